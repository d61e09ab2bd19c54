//! Wire envelope exchanged with the hook process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::MessageType;

/// Codec error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One message unit: type, payload and an optional correlation id.
///
/// Older hook builds name the correlation field `extend`; it is accepted on
/// decode and always written as `correlationId`. A missing `data` decodes as
/// `Null`; outbound envelopes never carry `Null` (see [`Envelope::new`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default)]
    pub data: Value,
    #[serde(
        rename = "correlationId",
        alias = "extend",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Envelope {
    /// Create an uncorrelated envelope. A `Null` payload becomes `{}`.
    #[must_use]
    pub fn new(msg_type: MessageType, data: Value) -> Self {
        Self {
            msg_type,
            data: if data.is_null() { empty_object() } else { data },
            correlation_id: None,
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Serialize to the JSON text handed to the transport.
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse JSON text delivered by the transport.
    ///
    /// # Errors
    /// Returns error if the text is not a valid envelope.
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(raw)?)
    }
}
