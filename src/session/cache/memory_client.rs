//! In-process list cache with TTL expiry.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::session::cache::{CacheClient, CacheFuture};
use crate::session::core::errors::SessionResult;

/// List entry with an optional expiry.
#[derive(Clone, Debug, Default)]
struct ListEntry {
    items: VecDeque<String>,
    expires_at: Option<Instant>,
}

impl ListEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// Thread-safe in-process cache client.
///
/// Only visible to the current process, so it cannot share state between
/// instances; useful for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryCacheClient {
    lists: DashMap<String, ListEntry>,
}

impl InMemoryCacheClient {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cleanup_expired();
        self.lists.len()
    }

    /// Whether no live key exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired keys.
    pub fn cleanup_expired(&self) {
        self.lists.retain(|_, entry| !entry.is_expired());
    }

    fn drop_if_expired(&self, key: &str) {
        self.lists.remove_if(key, |_, entry| entry.is_expired());
    }
}

impl CacheClient for InMemoryCacheClient {
    fn list_push<'a>(&'a self, key: &'a str, value: String) -> CacheFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            self.drop_if_expired(key);
            self.lists
                .entry(key.to_string())
                .or_default()
                .items
                .push_back(value);
            Ok(())
        })
    }

    fn list_trim_tail<'a>(
        &'a self,
        key: &'a str,
        keep: usize,
    ) -> CacheFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            if let Some(mut entry) = self.lists.get_mut(key) {
                while entry.items.len() > keep {
                    entry.items.pop_front();
                }
            }
            Ok(())
        })
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> CacheFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            if let Some(mut entry) = self.lists.get_mut(key) {
                // A TTL past the clock's range never expires.
                entry.expires_at = Instant::now().checked_add(ttl);
            }
            Ok(())
        })
    }

    fn list_tail<'a>(
        &'a self,
        key: &'a str,
        limit: usize,
    ) -> CacheFuture<'a, SessionResult<Vec<String>>> {
        Box::pin(async move {
            self.drop_if_expired(key);
            let items = self.lists.get(key).map_or_else(Vec::new, |entry| {
                let skip = entry.items.len().saturating_sub(limit);
                entry.items.iter().skip(skip).cloned().collect()
            });
            Ok(items)
        })
    }
}
