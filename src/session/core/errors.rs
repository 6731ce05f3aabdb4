//! Error and warning types for the session accumulator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::core::ids::{ConversationId, SessionId};

/// Lifecycle state of a single session controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Before the start event.
    Uninitialized,
    /// Between start and end; turns and participant events are accepted.
    Active,
    /// The end-of-session flush is running.
    Ending,
    /// Final state; every further call fails.
    Terminated,
}

impl LifecycleState {
    /// Stable string form for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session accumulator error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation was called in a lifecycle state that forbids it.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the controller was in.
        state: LifecycleState,
    },
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The manager does not host this session.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    /// An I/O operation did not finish in time.
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Budget that was exceeded.
        after_ms: u64,
    },
    /// The durable sink rejected a request.
    #[error("sink error: {0}")]
    Sink(String),
    /// The durable sink refused a request; resending it cannot succeed.
    #[error("{operation} rejected with HTTP {status}")]
    SinkRejected {
        /// Rejected operation.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
    },
    /// No factory is registered for a provider.
    #[error("no {capability} provider registered for {kind}")]
    ProviderNotRegistered {
        /// Capability that was requested (stt, llm, tts).
        capability: &'static str,
        /// Provider tag.
        kind: String,
    },
    /// A provider adapter failed.
    #[error("provider error: {0}")]
    Provider(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Redis error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether retrying the same request could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::InvalidState { .. }
                | Self::InvalidConfig(_)
                | Self::UnknownSession(_)
                | Self::SinkRejected { .. }
                | Self::ProviderNotRegistered { .. }
                | Self::Serialization(_)
                | Self::Url(_)
        )
    }

    /// Shorthand for an invalid state error.
    #[must_use]
    pub const fn invalid_state(operation: &'static str, state: LifecycleState) -> Self {
        Self::InvalidState { operation, state }
    }
}

/// Convenience result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// A recoverable degradation observed while running a session.
///
/// Warnings never abort a session. They are logged where they happen and
/// collected on the controller so the host can decide whether to alert.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionWarning {
    /// Reading recent history from the durable sink failed or timed out.
    Hydration {
        /// Conversation being hydrated.
        conversation_id: ConversationId,
        /// Failure description.
        reason: String,
    },
    /// Mirroring a message into the shared cache failed.
    MirrorWrite {
        /// Conversation of the message.
        conversation_id: ConversationId,
        /// Sequence of the message.
        sequence: u64,
        /// Failure description.
        reason: String,
    },
    /// A join arrived for an identity that already has an open entry.
    DuplicateJoin {
        /// Participant identity.
        identity: String,
    },
    /// A leave arrived for an identity with no open entry.
    UnknownLeave {
        /// Participant identity.
        identity: String,
    },
}

impl SessionWarning {
    /// Stable name of the warning kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hydration { .. } => "hydration",
            Self::MirrorWrite { .. } => "mirror_write",
            Self::DuplicateJoin { .. } => "duplicate_join",
            Self::UnknownLeave { .. } => "unknown_leave",
        }
    }
}

/// Bounded record of a session's warnings.
///
/// The first [`MAX_PER_KIND`](Self::MAX_PER_KIND) warnings of each kind are
/// kept; later ones are only counted, so a cache outage lasting a whole
/// session cannot grow it without limit.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionWarnings {
    entries: Vec<SessionWarning>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    suppressed: BTreeMap<String, u64>,
}

impl SessionWarnings {
    /// Warnings kept per kind.
    pub const MAX_PER_KIND: usize = 8;

    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `warning`. Returns `false` when it was only counted.
    pub fn push(&mut self, warning: SessionWarning) -> bool {
        let kind = warning.kind();
        let kept = self.entries.iter().filter(|w| w.kind() == kind).count();
        if kept < Self::MAX_PER_KIND {
            self.entries.push(warning);
            return true;
        }
        *self.suppressed.entry(kind.to_string()).or_default() += 1;
        false
    }

    /// Kept warnings, in the order they happened.
    #[must_use]
    pub fn entries(&self) -> &[SessionWarning] {
        &self.entries
    }

    /// Warnings counted but not kept, by kind.
    #[must_use]
    pub const fn suppressed(&self) -> &BTreeMap<String, u64> {
        &self.suppressed
    }

    /// Number of kept warnings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every warning recorded, kept or counted.
    #[must_use]
    pub fn total(&self) -> u64 {
        let kept = u64::try_from(self.entries.len()).unwrap_or(u64::MAX);
        kept.saturating_add(self.suppressed.values().sum::<u64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = SessionError::invalid_state("record_turn", LifecycleState::Terminated);
        assert_eq!(err.to_string(), "cannot record_turn while session is terminated");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        let timeout = SessionError::Timeout {
            operation: "write_summary",
            after_ms: 5000,
        };
        assert!(timeout.is_transient());
        assert!(SessionError::Sink("503".to_string()).is_transient());
        assert!(!SessionError::InvalidConfig("bad".to_string()).is_transient());
        let rejected = SessionError::SinkRejected {
            operation: "write_summary",
            status: 400,
        };
        assert!(!rejected.is_transient());
        assert_eq!(rejected.to_string(), "write_summary rejected with HTTP 400");
    }

    #[test]
    fn test_warnings_are_capped_per_kind() {
        let mut warnings = SessionWarnings::new();
        for sequence in 1..=100 {
            warnings.push(SessionWarning::MirrorWrite {
                conversation_id: ConversationId::new("c1"),
                sequence,
                reason: "connection refused".to_string(),
            });
        }
        assert!(warnings.push(SessionWarning::UnknownLeave {
            identity: "ghost".to_string(),
        }));

        assert_eq!(warnings.len(), SessionWarnings::MAX_PER_KIND + 1);
        assert_eq!(warnings.suppressed()["mirror_write"], 92);
        assert_eq!(warnings.total(), 101);
        assert!(matches!(
            warnings.entries().last(),
            Some(SessionWarning::UnknownLeave { .. })
        ));
    }
}
