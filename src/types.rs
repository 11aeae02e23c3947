//! Core types: timestamps and the stored payload envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since Unix epoch.
///
/// Assigned at the moment of every local mutation; conflict resolution
/// compares these values, so they are never backdated.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_nanos() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// The envelope persisted per key: `{"value": ..., "last_modified": ...}`.
///
/// A `null` value is the deletion sentinel: a queued payload whose value is
/// `null` means "this key should not exist".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub value: Value,
    pub last_modified: Timestamp,
}

impl Payload {
    pub fn new(value: Value, last_modified: Timestamp) -> Self {
        Self {
            value,
            last_modified,
        }
    }

    /// Deletion marker for a key.
    pub fn tombstone(last_modified: Timestamp) -> Self {
        Self {
            value: Value::Null,
            last_modified,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_null()
    }

    /// Parse a raw backend document.
    ///
    /// Backward-compatible fallback: a document that is not an object carrying
    /// both `value` and `last_modified` is treated wholesale as the value,
    /// with `last_modified = 0`.
    pub fn from_raw(raw: &str) -> Result<Self, serde_json::Error> {
        let doc: Value = serde_json::from_str(raw)?;
        let is_envelope = doc
            .as_object()
            .map_or(false, |m| m.contains_key("value") && m.contains_key("last_modified"));
        if is_envelope {
            serde_json::from_value(doc)
        } else {
            Ok(Self {
                value: doc,
                last_modified: Timestamp(0),
            })
        }
    }

    pub fn to_raw(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_round_trip() {
        let payload = Payload::new(json!({"a": [1, 2, 3]}), Timestamp(42));
        let raw = payload.to_raw().unwrap();
        let parsed = Payload::from_raw(&raw).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_legacy_document_fallback() {
        // Pre-envelope documents are taken wholesale with timestamp 0
        let parsed = Payload::from_raw("42").unwrap();
        assert_eq!(parsed.value, json!(42));
        assert_eq!(parsed.last_modified, Timestamp(0));

        let parsed = Payload::from_raw(r#"{"value": 1}"#).unwrap();
        assert_eq!(parsed.value, json!({"value": 1}));
        assert_eq!(parsed.last_modified, Timestamp(0));
    }

    #[test]
    fn test_tombstone() {
        let payload = Payload::tombstone(Timestamp(7));
        assert!(payload.is_tombstone());
        assert!(!Payload::new(json!(0), Timestamp(7)).is_tombstone());
    }

    #[test]
    fn test_timestamp_monotonic() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(b >= a);
    }
}
