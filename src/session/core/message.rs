//! Role-tagged conversation messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a message author.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End-user speech or text.
    User,
    /// Assistant response.
    Assistant,
    /// System instruction or notice.
    System,
}

impl Role {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err(value.to_string()),
        }
    }
}

/// A single appended message.
///
/// Messages are immutable once the log has assigned their `sequence`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author role.
    pub role: Role,
    /// Text payload; may be empty.
    pub content: String,
    /// Append time, non-decreasing within a session.
    pub timestamp: DateTime<Utc>,
    /// Position in the conversation, strictly increasing from 1.
    pub sequence: u64,
    /// Host-supplied metadata, e.g. speaker id or STT confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Build a message with an explicit sequence and timestamp.
    #[must_use]
    pub fn new(
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
            sequence,
            metadata: None,
        }
    }

    /// Attach host metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::from_str(role.as_str()), Ok(role));
        }
        assert!(Role::from_str("tool").is_err());
    }

    #[test]
    fn test_message_json_shape() {
        let msg = Message::new(Role::Assistant, "hello", Utc::now(), 2);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["sequence"], 2);
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_metadata_survives_json() {
        let msg = Message::new(Role::User, "hi", Utc::now(), 1)
            .with_metadata(Some(serde_json::json!({"speaker": "alice", "confidence": 0.9})));
        let restored: Message = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(restored, msg);

        let legacy: Message = serde_json::from_value(serde_json::json!({
            "role": "assistant",
            "content": "hello",
            "timestamp": "2024-01-01T00:00:00Z",
            "sequence": 2
        }))
        .unwrap();
        assert_eq!(legacy.metadata, None);
    }
}
