//! Login profile reported by the hook process.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Last known login information for a session.
///
/// Replaced wholesale on every login notification; fields are whatever the
/// hook process reports (`wxid`, `nickname`, `account`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    fields: Map<String, Value>,
}

impl Profile {
    /// Build a profile from a login payload. Non-object payloads yield an
    /// empty profile.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::Object(fields) => Self {
                fields: fields.clone(),
            },
            _ => Self::default(),
        }
    }

    /// Get a field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a string field by key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_object_payload() {
        let profile = Profile::from_payload(&json!({"nickname": "A", "wxid": "wxid_a"}));
        assert_eq!(profile.get_str("nickname"), Some("A"));
        assert_eq!(profile.to_value(), json!({"nickname": "A", "wxid": "wxid_a"}));
    }

    #[test]
    fn test_non_object_payload_is_empty() {
        assert!(Profile::from_payload(&json!([1, 2])).is_empty());
        assert!(Profile::from_payload(&Value::Null).is_empty());
    }
}
