//! Optional shared cache mirror of recent messages.
//!
//! - `mirror`: best-effort write-through of appended messages
//! - `redis_client`: Redis-backed list client for multi-instance deployments
//! - `memory_client`: in-process list client for development and tests

pub mod memory_client;
pub mod mirror;
pub mod redis_client;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::session::core::errors::SessionResult;

pub use memory_client::InMemoryCacheClient;
pub use mirror::{CacheMirror, MirrorStatus};
pub use redis_client::RedisCacheClient;

/// Boxed future type for cache client operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Ordered-list primitives of a shared key-value cache.
///
/// Implementations must be safe to share across many sessions.
pub trait CacheClient: Send + Sync {
    /// Push `value` onto the tail of the list at `key`.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be reached.
    fn list_push<'a>(&'a self, key: &'a str, value: String) -> CacheFuture<'a, SessionResult<()>>;

    /// Trim the list at `key` to its last `keep` items.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be reached.
    fn list_trim_tail<'a>(&'a self, key: &'a str, keep: usize)
    -> CacheFuture<'a, SessionResult<()>>;

    /// Set or refresh the time-to-live of `key`.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be reached.
    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> CacheFuture<'a, SessionResult<()>>;

    /// Read up to `limit` items from the tail of the list at `key`, oldest first.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be reached.
    fn list_tail<'a>(
        &'a self,
        key: &'a str,
        limit: usize,
    ) -> CacheFuture<'a, SessionResult<Vec<String>>>;

    /// Push, trim and expire in one call.
    ///
    /// The default runs the three primitives in order; clients that can batch
    /// them should override it.
    ///
    /// # Errors
    /// Returns an error if any step fails.
    fn append_bounded<'a>(
        &'a self,
        key: &'a str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> CacheFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            self.list_push(key, value).await?;
            self.list_trim_tail(key, max_len).await?;
            self.expire(key, ttl).await
        })
    }
}
