//! Session state record
//!
//! The store never inspects the context map; it belongs to whichever
//! caller owns the session.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::now_ms;

/// A complete session state record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable session identifier (e.g. "user_id:chat_id")
    pub session_id: String,

    /// Arbitrary session context, opaque to the store
    #[serde(default)]
    pub context: Map<String, Value>,

    /// Monotonically increasing version, bumped on every successful save
    pub version: u64,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl SessionRecord {
    /// Create a fresh record for a session
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            session_id: session_id.into(),
            context: Map::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump the version and update timestamp
    ///
    /// Called by the manager before every write so that `version`
    /// strictly increases across saves of the same session.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = now_ms();
    }

    /// Set a context value
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    /// Get a context value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Remove a context value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.context.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record() {
        let record = SessionRecord::new("user-1:chat-2");
        assert_eq!(record.session_id, "user-1:chat-2");
        assert_eq!(record.version, 1);
        assert!(record.context.is_empty());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_touch_bumps_version() {
        let mut record = SessionRecord::new("s");
        let v0 = record.version;
        record.touch();
        record.touch();
        assert_eq!(record.version, v0 + 2);
    }

    #[test]
    fn test_context_accessors() {
        let mut record = SessionRecord::new("s");
        record.set("step", serde_json::json!("start"));
        assert_eq!(record.get("step"), Some(&serde_json::json!("start")));

        let removed = record.remove("step");
        assert_eq!(removed, Some(serde_json::json!("start")));
        assert!(record.get("step").is_none());
    }

    #[test]
    fn test_record_serde_round_trip() {
        let mut record = SessionRecord::new("user-9:chat-9");
        record.set("pending_invoice", serde_json::json!({"vendor": "Acme", "amount": 120.5}));
        record.set("history", serde_json::json!([{"role": "user", "content": "hi"}]));
        record.touch();

        let json = serde_json::to_string(&record).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);

        // A second serialization must be byte-identical
        let json2 = serde_json::to_string(&back).unwrap();
        assert_eq!(json, json2);
    }
}
