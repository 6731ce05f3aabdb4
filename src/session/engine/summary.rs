//! End-of-session summary.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::core::context::SessionContext;
use crate::session::core::errors::SessionWarnings;
use crate::session::core::ids::{ConversationId, SessionId};
use crate::session::core::message::Message;
use crate::session::state::participants::ParticipantSnapshot;

/// Outcome of the end-of-session write.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DurabilityStatus {
    /// The summary has not been handed to the sink yet.
    Pending,
    /// The sink accepted the summary.
    Persisted {
        /// Attempts made, first included.
        attempts: u32,
    },
    /// Every attempt failed.
    Failed {
        /// Attempts made, first included.
        attempts: u32,
        /// Last error.
        error: String,
    },
}

impl DurabilityStatus {
    /// Whether the sink accepted the summary.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }

    /// Number of write attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Pending => 0,
            Self::Persisted { attempts } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Immutable record of a finished session, built once at teardown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: SessionId,
    /// Conversation identifier.
    pub conversation_id: ConversationId,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub ended_at: DateTime<Utc>,
    /// `ended_at - started_at` in milliseconds.
    pub duration_ms: u64,
    /// Retained messages at the moment the session ended, oldest first.
    pub messages: Vec<Message>,
    /// Every participant's join/leave cycles.
    pub participants: ParticipantSnapshot,
    /// Messages appended or hydrated over the session, trimmed ones included.
    pub total_messages: u64,
    /// Result of the durable write.
    pub status: DurabilityStatus,
    /// Host key-value context set during the session.
    #[serde(default)]
    pub user_context: BTreeMap<String, serde_json::Value>,
    /// Degradations observed during the session.
    pub warnings: SessionWarnings,
}

impl SessionSummary {
    /// Build a pending summary from session state.
    ///
    /// The context must already carry its end time; a missing one is taken
    /// as `started_at`.
    #[must_use]
    pub fn build(
        context: &SessionContext,
        messages: Vec<Message>,
        participants: ParticipantSnapshot,
        total_messages: u64,
        warnings: SessionWarnings,
    ) -> Self {
        let started_at = context.started_at();
        let ended_at = context.ended_at().unwrap_or(started_at);
        let duration_ms = (ended_at - started_at)
            .to_std()
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

        Self {
            session_id: context.session_id().clone(),
            conversation_id: context.conversation_id().clone(),
            started_at,
            ended_at,
            duration_ms,
            messages,
            participants,
            total_messages,
            status: DurabilityStatus::Pending,
            user_context: context.user_context_entries().clone(),
            warnings,
        }
    }

    /// Session duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::core::message::Role;

    #[test]
    fn test_build_computes_duration() {
        let start = Utc::now();
        let mut context = SessionContext::new(SessionId::new("s1"), ConversationId::new("c1"), start);
        context.mark_ended(start + chrono::Duration::milliseconds(1500));
        context.set_user_context("locale", serde_json::json!("fr-FR"));

        let messages = vec![Message::new(Role::User, "hi", start, 1)];
        let summary = SessionSummary::build(
            &context,
            messages,
            ParticipantSnapshot::new(),
            1,
            SessionWarnings::new(),
        );

        assert_eq!(summary.duration(), Duration::from_millis(1500));
        assert_eq!(summary.status, DurabilityStatus::Pending);
        assert_eq!(summary.messages.len(), 1);
        assert_eq!(summary.user_context["locale"], "fr-FR");
    }

    #[test]
    fn test_status_serializes_tagged() {
        let status = DurabilityStatus::Failed {
            attempts: 2,
            error: "timeout".to_string(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["attempts"], 2);
        assert_eq!(status.attempts(), 2);
        assert!(!status.is_persisted());
    }
}
