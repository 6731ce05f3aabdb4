//! Best-effort write-through of session messages into a shared cache.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::session::cache::CacheClient;
use crate::session::core::config::{CacheConfig, SessionConfig};
use crate::session::core::ids::ConversationId;
use crate::session::core::message::Message;

/// Outcome of mirroring one message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MirrorStatus {
    /// The message reached the cache.
    Mirrored,
    /// No cache is configured.
    Disabled,
    /// The cache write failed or timed out; the session continues.
    Failed(String),
}

/// Mirrors appended messages into a bounded, expiring per-conversation list.
///
/// Failures never propagate: callers get a [`MirrorStatus`] and decide what
/// to report.
#[derive(Clone)]
pub struct CacheMirror {
    client: Option<Arc<dyn CacheClient>>,
    key_prefix: String,
    max_len: usize,
    ttl: Duration,
    op_timeout: Duration,
}

impl CacheMirror {
    /// Mirror backed by `client`.
    #[must_use]
    pub fn new(client: Arc<dyn CacheClient>, cache: &CacheConfig, session: &SessionConfig) -> Self {
        Self {
            client: Some(client),
            key_prefix: cache.key_prefix.clone(),
            max_len: session.cache_max_len,
            ttl: session.cache_ttl(),
            op_timeout: session.cache_op_timeout(),
        }
    }

    /// Mirror that does nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            client: None,
            key_prefix: String::new(),
            max_len: 0,
            ttl: Duration::ZERO,
            op_timeout: Duration::ZERO,
        }
    }

    /// Whether a cache client is attached.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Cache key of a conversation's message list.
    #[must_use]
    pub fn key(&self, conversation_id: &ConversationId) -> String {
        format!("{}:{conversation_id}:messages", self.key_prefix)
    }

    /// Append `message` to the conversation's list, trimming and refreshing its TTL.
    pub async fn mirror_append(
        &self,
        conversation_id: &ConversationId,
        message: &Message,
    ) -> MirrorStatus {
        let Some(client) = &self.client else {
            return MirrorStatus::Disabled;
        };
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => return MirrorStatus::Failed(err.to_string()),
        };
        let key = self.key(conversation_id);
        let write = client.append_bounded(&key, payload, self.max_len, self.ttl);

        match tokio::time::timeout(self.op_timeout, write).await {
            Ok(Ok(())) => {
                debug!(
                    conversation_id = %conversation_id,
                    sequence = message.sequence,
                    "Mirrored message to cache"
                );
                MirrorStatus::Mirrored
            }
            Ok(Err(err)) => {
                warn!(
                    conversation_id = %conversation_id,
                    sequence = message.sequence,
                    error = %err,
                    "Cache mirror write failed"
                );
                MirrorStatus::Failed(err.to_string())
            }
            Err(_) => {
                let reason = format!("timed out after {} ms", self.op_timeout.as_millis());
                warn!(
                    conversation_id = %conversation_id,
                    sequence = message.sequence,
                    reason = %reason,
                    "Cache mirror write failed"
                );
                MirrorStatus::Failed(reason)
            }
        }
    }

    /// Read up to `limit` recent messages of a conversation, oldest first.
    ///
    /// Any failure, including an undecodable entry, yields an empty list.
    pub async fn load(&self, conversation_id: &ConversationId, limit: usize) -> Vec<Message> {
        let Some(client) = &self.client else {
            return Vec::new();
        };
        let key = self.key(conversation_id);
        let raw = match tokio::time::timeout(self.op_timeout, client.list_tail(&key, limit)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                warn!(conversation_id = %conversation_id, error = %err, "Cache read failed");
                return Vec::new();
            }
            Err(_) => {
                warn!(conversation_id = %conversation_id, "Cache read timed out");
                return Vec::new();
            }
        };

        let decoded: Result<Vec<Message>, _> = raw
            .iter()
            .map(|entry| serde_json::from_str::<Message>(entry))
            .collect();
        decoded.unwrap_or_else(|err| {
            warn!(conversation_id = %conversation_id, error = %err, "Cache entry undecodable");
            Vec::new()
        })
    }
}
