//! Durable storage for messages and session summaries.
//!
//! - `memory_sink`: in-process sink for development and tests
//! - `sqlite_sink`: `SQLite` tables through tokio-rusqlite
//! - `http_sink`: REST backend client

pub mod http_sink;
pub mod memory_sink;
pub mod sqlite_sink;

use std::future::Future;
use std::pin::Pin;

use crate::session::core::errors::SessionResult;
use crate::session::core::ids::ConversationId;
use crate::session::core::message::Message;
use crate::session::engine::summary::SessionSummary;

pub use http_sink::HttpSink;
pub use memory_sink::InMemorySink;
pub use sqlite_sink::SqliteSink;

/// Boxed future type for sink operations.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Authoritative persistence for session data.
///
/// Shared by every session in the process, so implementations must handle
/// concurrent calls internally.
pub trait DurableSink: Send + Sync {
    /// Persist one message.
    ///
    /// Writing the same `(conversation_id, sequence)` twice must leave a single
    /// row, since background delivery is at-least-once.
    ///
    /// # Errors
    /// Returns an error if the write is rejected or storage is unreachable.
    fn write_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        message: &'a Message,
    ) -> SinkFuture<'a, SessionResult<()>>;

    /// Persist a finished session's summary and its messages.
    ///
    /// # Errors
    /// Returns an error if the write is rejected or storage is unreachable.
    fn write_summary<'a>(&'a self, summary: &'a SessionSummary)
    -> SinkFuture<'a, SessionResult<()>>;

    /// Load the last `limit` messages of a conversation, ordered by sequence.
    ///
    /// # Errors
    /// Returns an error if storage is unreachable.
    fn read_recent_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        limit: usize,
    ) -> SinkFuture<'a, SessionResult<Vec<Message>>>;
}
