//! Session events delivered by the real-time dispatcher and their outcomes.

use serde::{Deserialize, Serialize};

use crate::session::core::context::SessionContext;
use crate::session::core::ids::{ConversationId, SessionId};
use crate::session::core::message::{Message, Role};
use crate::session::engine::summary::SessionSummary;
use crate::session::state::participants::{JoinOutcome, LeaveOutcome};

/// One lifecycle event for a session.
///
/// Serialized as a JSON object tagged by `type`, e.g.
/// `{"type":"turn","session_id":"s1","role":"user","content":"hi"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Open the session.
    Start {
        /// Session identifier.
        session_id: SessionId,
        /// Conversation to continue; generated when absent.
        #[serde(default)]
        conversation_id: Option<ConversationId>,
        /// Pre-populate history from the durable sink.
        #[serde(default)]
        hydrate: bool,
    },
    /// A completed turn.
    Turn {
        /// Session identifier.
        session_id: SessionId,
        /// Author role.
        role: Role,
        /// Turn text.
        content: String,
        /// Host metadata stored with the message.
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    /// Store a host context value for the session.
    SetContext {
        /// Session identifier.
        session_id: SessionId,
        /// Context key.
        key: String,
        /// Value to store.
        value: serde_json::Value,
    },
    /// A participant connected.
    ParticipantJoined {
        /// Session identifier.
        session_id: SessionId,
        /// Participant identity.
        identity: String,
        /// Host metadata.
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    /// A participant disconnected.
    ParticipantLeft {
        /// Session identifier.
        session_id: SessionId,
        /// Participant identity.
        identity: String,
    },
    /// Close the session and flush its summary.
    End {
        /// Session identifier.
        session_id: SessionId,
    },
}

impl SessionEvent {
    /// Session the event targets.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        match self {
            Self::Start { session_id, .. }
            | Self::Turn { session_id, .. }
            | Self::SetContext { session_id, .. }
            | Self::ParticipantJoined { session_id, .. }
            | Self::ParticipantLeft { session_id, .. }
            | Self::End { session_id } => session_id,
        }
    }

    /// Event tag, as used in the serialized form.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Turn { .. } => "turn",
            Self::SetContext { .. } => "set_context",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::End { .. } => "end",
        }
    }
}

/// Result of applying a [`SessionEvent`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    /// The session is active.
    Started {
        /// Identity and timing of the new session.
        context: SessionContext,
        /// Messages loaded from the durable sink.
        hydrated: usize,
    },
    /// A turn was appended.
    Recorded {
        /// The appended message.
        message: Message,
    },
    /// A context value was stored.
    ContextSet {
        /// Context key.
        key: String,
        /// Value replaced, if any.
        previous: Option<serde_json::Value>,
    },
    /// A join was processed.
    Joined {
        /// Participant identity.
        identity: String,
        /// Whether a new entry was opened.
        result: JoinOutcome,
    },
    /// A leave was processed.
    Left {
        /// Participant identity.
        identity: String,
        /// Whether an open entry was closed.
        result: LeaveOutcome,
    },
    /// The session ended.
    Ended {
        /// Final summary with its durability status.
        summary: Box<SessionSummary>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_turn_event() {
        let event: SessionEvent = serde_json::from_value(json!({
            "type": "turn",
            "session_id": "s1",
            "role": "assistant",
            "content": "hello"
        }))
        .unwrap();
        assert_eq!(event.name(), "turn");
        assert_eq!(event.session_id().as_str(), "s1");
        assert!(matches!(event, SessionEvent::Turn { metadata: None, .. }));
    }

    #[test]
    fn test_parse_turn_with_metadata_and_set_context() {
        let turn: SessionEvent = serde_json::from_value(json!({
            "type": "turn",
            "session_id": "s1",
            "role": "user",
            "content": "hi",
            "metadata": {"source": "stt"}
        }))
        .unwrap();
        let SessionEvent::Turn { metadata, .. } = turn else {
            panic!("expected a turn");
        };
        assert_eq!(metadata, Some(json!({"source": "stt"})));

        let set: SessionEvent = serde_json::from_value(json!({
            "type": "set_context",
            "session_id": "s1",
            "key": "locale",
            "value": "fr-FR"
        }))
        .unwrap();
        assert_eq!(set.name(), "set_context");
        assert_eq!(set.session_id().as_str(), "s1");
    }

    #[test]
    fn test_start_defaults() {
        let event: SessionEvent =
            serde_json::from_value(json!({"type": "start", "session_id": "s1"})).unwrap();
        assert_eq!(
            event,
            SessionEvent::Start {
                session_id: SessionId::new("s1"),
                conversation_id: None,
                hydrate: false,
            }
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<SessionEvent, _> =
            serde_json::from_value(json!({"type": "mute", "session_id": "s1"}));
        assert!(result.is_err());
    }
}
