//! In-process durable sink.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::session::core::errors::SessionResult;
use crate::session::core::ids::{ConversationId, SessionId};
use crate::session::core::message::Message;
use crate::session::engine::summary::SessionSummary;
use crate::session::sink::{DurableSink, SinkFuture};

/// Sink that keeps everything in process memory.
///
/// Messages are keyed by `(conversation_id, sequence)`; the first write of a
/// key wins.
#[derive(Debug, Default)]
pub struct InMemorySink {
    messages: DashMap<ConversationId, BTreeMap<u64, Message>>,
    summaries: DashMap<SessionId, SessionSummary>,
}

impl InMemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message of a conversation, ordered by sequence.
    #[must_use]
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.messages
            .get(conversation_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stored summary of a session.
    #[must_use]
    pub fn summary(&self, session_id: &SessionId) -> Option<SessionSummary> {
        self.summaries.get(session_id).map(|entry| entry.clone())
    }

    /// Number of stored summaries.
    #[must_use]
    pub fn summary_count(&self) -> usize {
        self.summaries.len()
    }

    fn insert(&self, conversation_id: &ConversationId, message: &Message) {
        self.messages
            .entry(conversation_id.clone())
            .or_default()
            .entry(message.sequence)
            .or_insert_with(|| message.clone());
    }
}

impl DurableSink for InMemorySink {
    fn write_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        message: &'a Message,
    ) -> SinkFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            self.insert(conversation_id, message);
            Ok(())
        })
    }

    fn write_summary<'a>(
        &'a self,
        summary: &'a SessionSummary,
    ) -> SinkFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            for message in &summary.messages {
                self.insert(&summary.conversation_id, message);
            }
            self.summaries
                .insert(summary.session_id.clone(), summary.clone());
            Ok(())
        })
    }

    fn read_recent_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        limit: usize,
    ) -> SinkFuture<'a, SessionResult<Vec<Message>>> {
        Box::pin(async move {
            let mut recent: Vec<Message> = self
                .messages
                .get(conversation_id)
                .map(|rows| rows.values().rev().take(limit).cloned().collect())
                .unwrap_or_default();
            recent.reverse();
            Ok(recent)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::core::message::Role;
    use chrono::Utc;

    fn message(sequence: u64, content: &str) -> Message {
        Message::new(Role::User, content, Utc::now(), sequence)
    }

    #[tokio::test]
    async fn test_write_message_is_idempotent() {
        let sink = InMemorySink::new();
        let cid = ConversationId::new("c1");
        sink.write_message(&cid, &message(1, "first")).await.unwrap();
        sink.write_message(&cid, &message(1, "retry")).await.unwrap();

        let stored = sink.messages(&cid);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "first");
    }

    #[tokio::test]
    async fn test_out_of_order_writes_read_back_ordered() {
        let sink = InMemorySink::new();
        let cid = ConversationId::new("c1");
        for seq in [3, 1, 2] {
            sink.write_message(&cid, &message(seq, "x")).await.unwrap();
        }
        let recent = sink.read_recent_messages(&cid, 2).await.unwrap();
        let sequences: Vec<u64> = recent.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_conversation_reads_empty() {
        let sink = InMemorySink::new();
        let recent = sink
            .read_recent_messages(&ConversationId::new("missing"), 10)
            .await
            .unwrap();
        assert!(recent.is_empty());
    }
}
