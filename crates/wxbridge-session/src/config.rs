//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wait for typed queries.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default prefix for generated correlation ids.
pub const DEFAULT_ID_PREFIX: &str = "req";

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wait applied by the typed query helpers.
    #[serde(rename = "default_timeout_ms", with = "millis")]
    pub default_timeout: Duration,
    /// Prefix passed to the transport's id generator.
    pub id_prefix: String,
    /// Drop a pending call from the correlation table once its wait times
    /// out. When false, a late response is still consumed by the stale call.
    pub evict_on_timeout: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            evict_on_timeout: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_id_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    #[must_use]
    pub const fn with_evict_on_timeout(mut self, evict: bool) -> Self {
        self.evict_on_timeout = evict;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
