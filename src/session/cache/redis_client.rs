//! Redis list client.

use std::time::Duration;

use redis::Client;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::session::cache::{CacheClient, CacheFuture};
use crate::session::core::errors::{SessionError, SessionResult};

/// Redis-backed cache client.
///
/// Clones share one reconnecting connection manager.
#[derive(Clone)]
pub struct RedisCacheClient {
    manager: ConnectionManager,
}

impl RedisCacheClient {
    /// Connect to the Redis server at `url`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server cannot be reached.
    pub async fn connect(url: &str) -> SessionResult<Self> {
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        info!("Connected to Redis cache");
        Ok(Self { manager })
    }

    /// Round-trip a `PING`.
    ///
    /// # Errors
    /// Returns an error if the server does not answer.
    pub async fn health_check(&self) -> SessionResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

fn negative_index(count: usize) -> SessionResult<i64> {
    i64::try_from(count)
        .map(|value| -value)
        .map_err(|_| SessionError::InvalidConfig(format!("list length {count} out of range")))
}

impl CacheClient for RedisCacheClient {
    fn list_push<'a>(&'a self, key: &'a str, value: String) -> CacheFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            redis::cmd("RPUSH")
                .arg(key)
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn list_trim_tail<'a>(
        &'a self,
        key: &'a str,
        keep: usize,
    ) -> CacheFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            if keep == 0 {
                redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await?;
                return Ok(());
            }
            redis::cmd("LTRIM")
                .arg(key)
                .arg(negative_index(keep)?)
                .arg(-1)
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> CacheFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.as_secs().max(1))
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn list_tail<'a>(
        &'a self,
        key: &'a str,
        limit: usize,
    ) -> CacheFuture<'a, SessionResult<Vec<String>>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let mut conn = self.manager.clone();
            let items: Vec<String> = redis::cmd("LRANGE")
                .arg(key)
                .arg(negative_index(limit)?)
                .arg(-1)
                .query_async(&mut conn)
                .await?;
            Ok(items)
        })
    }

    fn append_bounded<'a>(
        &'a self,
        key: &'a str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> CacheFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut pipe = redis::pipe();
            pipe.atomic().cmd("RPUSH").arg(key).arg(value).ignore();
            if max_len == 0 {
                pipe.cmd("DEL").arg(key).ignore();
            } else {
                pipe.cmd("LTRIM")
                    .arg(key)
                    .arg(negative_index(max_len)?)
                    .arg(-1)
                    .ignore();
            }
            pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs().max(1)).ignore();
            pipe.query_async::<_, ()>(&mut conn).await?;
            Ok(())
        })
    }
}
