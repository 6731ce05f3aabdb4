//! Identity and timing of one session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::core::ids::{ConversationId, SessionId};

/// Identity, lifecycle timestamps and host context of a session.
///
/// `conversation_id` is fixed at construction and `ended_at` can only be set
/// once, never before `started_at`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    session_id: SessionId,
    conversation_id: ConversationId,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    user_context: BTreeMap<String, serde_json::Value>,
}

impl SessionContext {
    /// Create a context that started at `started_at`.
    #[must_use]
    pub const fn new(
        session_id: SessionId,
        conversation_id: ConversationId,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            conversation_id,
            started_at,
            ended_at: None,
            user_context: BTreeMap::new(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Conversation identifier.
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Start time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// End time, once set.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Host context value stored under `key`.
    #[must_use]
    pub fn user_context(&self, key: &str) -> Option<&serde_json::Value> {
        self.user_context.get(key)
    }

    /// Every host context entry.
    #[must_use]
    pub const fn user_context_entries(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.user_context
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set_user_context(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.user_context.insert(key.into(), value)
    }

    /// Record the end time.
    ///
    /// Clamped to `started_at` if the clock went backwards. Returns the
    /// recorded value, or `None` when the end was already set.
    pub fn mark_ended(&mut self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.ended_at.is_some() {
            return None;
        }
        let at = at.max(self.started_at);
        self.ended_at = Some(at);
        Some(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn context() -> SessionContext {
        SessionContext::new(SessionId::new("s1"), ConversationId::new("c1"), Utc::now())
    }

    #[test]
    fn test_ended_at_is_set_once() {
        let mut ctx = context();
        let first = ctx.mark_ended(Utc::now());
        assert!(first.is_some());
        assert!(ctx.mark_ended(Utc::now() + Duration::seconds(5)).is_none());
        assert_eq!(ctx.ended_at(), first);
    }

    #[test]
    fn test_ended_at_never_precedes_start() {
        let mut ctx = context();
        let ended = ctx.mark_ended(ctx.started_at() - Duration::seconds(30));
        assert_eq!(ended, Some(ctx.started_at()));
    }

    #[test]
    fn test_user_context_set_and_replace() {
        let mut ctx = context();
        assert!(ctx.user_context("topic").is_none());
        assert!(ctx.set_user_context("topic", serde_json::json!("billing")).is_none());
        let previous = ctx.set_user_context("topic", serde_json::json!("refund"));
        assert_eq!(previous, Some(serde_json::json!("billing")));
        assert_eq!(ctx.user_context("topic"), Some(&serde_json::json!("refund")));
        assert_eq!(ctx.user_context_entries().len(), 1);
    }
}
