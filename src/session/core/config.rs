//! Configuration for the session accumulator.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::session::core::errors::{SessionError, SessionResult};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccumulatorConfig {
    /// Per-session settings.
    pub session: SessionConfig,
    /// Background durable writer settings.
    pub writer: WriterConfig,
    /// Durable sink selection and `SQLite` settings.
    pub storage: StorageConfig,
    /// REST backend settings for the http sink.
    pub backend: BackendConfig,
    /// Shared cache settings.
    pub cache: CacheConfig,
}

impl AccumulatorConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> SessionResult<()> {
        let session = &self.session;
        for (name, value) in [
            ("session.per_turn_write_timeout_ms", session.per_turn_write_timeout_ms),
            ("session.end_write_timeout_ms", session.end_write_timeout_ms),
            ("session.hydration_timeout_ms", session.hydration_timeout_ms),
            ("session.cache_op_timeout_ms", session.cache_op_timeout_ms),
            ("backend.request_timeout_ms", self.backend.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(SessionError::InvalidConfig(format!("{name} must be > 0")));
            }
        }

        if self.writer.worker_count == 0 {
            return Err(SessionError::InvalidConfig(
                "writer.worker_count must be > 0".to_string(),
            ));
        }

        if self.writer.queue_capacity == 0 {
            return Err(SessionError::InvalidConfig(
                "writer.queue_capacity must be > 0".to_string(),
            ));
        }

        if self.cache.enabled {
            if session.cache_max_len == 0 {
                return Err(SessionError::InvalidConfig(
                    "session.cache_max_len must be > 0 when the cache is enabled".to_string(),
                ));
            }
            if session.cache_ttl_seconds == 0 {
                return Err(SessionError::InvalidConfig(
                    "session.cache_ttl_seconds must be > 0 when the cache is enabled".to_string(),
                ));
            }
            match &self.cache.redis_url {
                Some(redis_url) => {
                    Url::parse(redis_url)?;
                }
                None => {
                    return Err(SessionError::InvalidConfig(
                        "cache.redis_url is required when the cache is enabled".to_string(),
                    ));
                }
            }
        }

        if let Some(base_url) = &self.backend.base_url {
            Url::parse(base_url)?;
        } else if self.storage.backend == SinkKind::Http {
            return Err(SessionError::InvalidConfig(
                "backend.base_url is required for the http sink".to_string(),
            ));
        }

        Ok(())
    }

    /// Build a configuration from `ACCUMULATOR_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> SessionResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults overlaid with values from `lookup`.
    ///
    /// # Errors
    /// Returns an error if a value is present but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> SessionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let session = &mut config.session;
        overlay(&lookup, "ACCUMULATOR_CAPACITY", &mut session.capacity)?;
        overlay(&lookup, "ACCUMULATOR_CACHE_TTL_SECONDS", &mut session.cache_ttl_seconds)?;
        overlay(&lookup, "ACCUMULATOR_CACHE_MAX_LEN", &mut session.cache_max_len)?;
        overlay(&lookup, "ACCUMULATOR_HYDRATION_LIMIT", &mut session.hydration_limit)?;
        overlay(
            &lookup,
            "ACCUMULATOR_HYDRATION_TIMEOUT_MS",
            &mut session.hydration_timeout_ms,
        )?;
        overlay(
            &lookup,
            "ACCUMULATOR_PER_TURN_WRITE_TIMEOUT_MS",
            &mut session.per_turn_write_timeout_ms,
        )?;
        overlay(
            &lookup,
            "ACCUMULATOR_END_WRITE_RETRY_COUNT",
            &mut session.end_write_retry_count,
        )?;
        overlay(
            &lookup,
            "ACCUMULATOR_END_WRITE_TIMEOUT_MS",
            &mut session.end_write_timeout_ms,
        )?;
        overlay(&lookup, "ACCUMULATOR_CACHE_OP_TIMEOUT_MS", &mut session.cache_op_timeout_ms)?;

        let writer = &mut config.writer;
        overlay(&lookup, "ACCUMULATOR_QUEUE_CAPACITY", &mut writer.queue_capacity)?;
        overlay(&lookup, "ACCUMULATOR_WORKER_COUNT", &mut writer.worker_count)?;
        overlay(&lookup, "ACCUMULATOR_DRAIN_GRACE_MS", &mut writer.drain_grace_ms)?;
        overlay(
            &lookup,
            "ACCUMULATOR_PER_TURN_WRITE_RETRY_COUNT",
            &mut writer.per_turn_write_retry_count,
        )?;

        overlay(&lookup, "ACCUMULATOR_SINK", &mut config.storage.backend)?;
        if let Some(path) = lookup("ACCUMULATOR_SQLITE_PATH") {
            config.storage.sqlite_path = PathBuf::from(path);
        }

        if let Some(base_url) = lookup("ACCUMULATOR_BACKEND_URL") {
            config.backend.base_url = Some(base_url);
        }
        if let Some(api_key) = lookup("ACCUMULATOR_BACKEND_API_KEY") {
            config.backend.api_key = Some(api_key);
        }
        overlay(
            &lookup,
            "ACCUMULATOR_BACKEND_TIMEOUT_MS",
            &mut config.backend.request_timeout_ms,
        )?;

        if let Some(redis_url) = lookup("ACCUMULATOR_REDIS_URL") {
            config.cache.enabled = true;
            config.cache.redis_url = Some(redis_url);
        }
        overlay(&lookup, "ACCUMULATOR_CACHE_ENABLED", &mut config.cache.enabled)?;
        if let Some(prefix) = lookup("ACCUMULATOR_CACHE_PREFIX") {
            config.cache.key_prefix = prefix;
        }

        Ok(config)
    }
}

fn overlay<F, T>(lookup: &F, key: &str, target: &mut T) -> SessionResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| SessionError::InvalidConfig(format!("{key}: cannot parse {raw:?}")))?;
    }
    Ok(())
}

/// Per-session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Max retained messages in the log; 0 retains nothing.
    pub capacity: usize,
    /// TTL applied to mirrored cache lists.
    pub cache_ttl_seconds: u64,
    /// Max length of a mirrored cache list.
    pub cache_max_len: usize,
    /// Messages pulled from the durable sink on hydration.
    pub hydration_limit: usize,
    /// Budget for the hydration read.
    pub hydration_timeout_ms: u64,
    /// Budget for one background per-turn write attempt.
    pub per_turn_write_timeout_ms: u64,
    /// Retries of the end-of-session summary write after the first attempt.
    pub end_write_retry_count: u32,
    /// Budget for one summary write attempt.
    pub end_write_timeout_ms: u64,
    /// Budget for one cache mirror operation.
    pub cache_op_timeout_ms: u64,
}

impl SessionConfig {
    /// Hydration read budget.
    #[must_use]
    pub const fn hydration_timeout(&self) -> Duration {
        Duration::from_millis(self.hydration_timeout_ms)
    }

    /// Per-turn write budget.
    #[must_use]
    pub const fn per_turn_write_timeout(&self) -> Duration {
        Duration::from_millis(self.per_turn_write_timeout_ms)
    }

    /// Summary write budget per attempt.
    #[must_use]
    pub const fn end_write_timeout(&self) -> Duration {
        Duration::from_millis(self.end_write_timeout_ms)
    }

    /// Cache operation budget.
    #[must_use]
    pub const fn cache_op_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_op_timeout_ms)
    }

    /// Cache key TTL.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            cache_ttl_seconds: 3600,
            cache_max_len: 100,
            hydration_limit: 20,
            hydration_timeout_ms: 1500,
            per_turn_write_timeout_ms: 2000,
            end_write_retry_count: 1,
            end_write_timeout_ms: 5000,
            cache_op_timeout_ms: 50,
        }
    }
}

/// Background durable writer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Max pending writes before the oldest is dropped.
    pub queue_capacity: usize,
    /// Number of worker tasks draining the queue.
    pub worker_count: usize,
    /// How long shutdown waits for outstanding writes.
    pub drain_grace_ms: u64,
    /// Retries of a per-turn write after the first attempt.
    pub per_turn_write_retry_count: u32,
}

impl WriterConfig {
    /// Shutdown drain budget.
    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            worker_count: 2,
            drain_grace_ms: 5000,
            per_turn_write_retry_count: 0,
        }
    }
}

/// Durable sink implementation selector.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// In-process map; development only.
    #[default]
    Memory,
    /// Local `SQLite` database.
    Sqlite,
    /// REST backend.
    Http,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "http" => Ok(Self::Http),
            other => Err(other.to_string()),
        }
    }
}

/// Storage configuration for the durable sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which sink to build.
    pub backend: SinkKind,
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Message table name.
    pub message_table: String,
    /// Summary table name.
    pub summary_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: SinkKind::Memory,
            sqlite_path: PathBuf::from("sessions.sqlite"),
            message_table: "session_messages".to_string(),
            summary_table: "session_summaries".to_string(),
        }
    }
}

/// REST backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL, e.g. `http://backend:8000`.
    pub base_url: Option<String>,
    /// Bearer token.
    pub api_key: Option<String>,
    /// Per-request timeout of the HTTP client.
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            request_timeout_ms: 10_000,
        }
    }
}

/// Shared cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether messages are mirrored into the shared cache.
    pub enabled: bool,
    /// Redis connection URL.
    pub redis_url: Option<String>,
    /// Prefix of every cache key.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: None,
            key_prefix: "conversation".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AccumulatorConfig::default();
        assert_eq!(config.session.capacity, 50);
        assert_eq!(config.session.cache_ttl_seconds, 3600);
        assert_eq!(config.session.cache_max_len, 100);
        assert_eq!(config.session.hydration_limit, 20);
        assert_eq!(config.session.per_turn_write_timeout_ms, 2000);
        assert_eq!(config.session.end_write_retry_count, 1);
        assert_eq!(config.session.end_write_timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_valid() {
        let mut config = AccumulatorConfig::default();
        config.session.capacity = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = AccumulatorConfig::default();
        config.writer.worker_count = 0;
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_http_sink_requires_base_url() {
        let mut config = AccumulatorConfig::default();
        config.storage.backend = SinkKind::Http;
        assert!(config.validate().is_err());
        config.backend.base_url = Some("http://backend:8000".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enabled_cache_requires_url() {
        let mut config = AccumulatorConfig::default();
        config.cache.enabled = true;
        assert!(config.validate().is_err());
        config.cache.redis_url = Some("redis://127.0.0.1:6379".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overlays_values() {
        let config = AccumulatorConfig::from_lookup(lookup_from(&[
            ("ACCUMULATOR_CAPACITY", "3"),
            ("ACCUMULATOR_SINK", "sqlite"),
            ("ACCUMULATOR_SQLITE_PATH", "/tmp/s.sqlite"),
            ("ACCUMULATOR_REDIS_URL", "redis://cache:6379"),
            ("ACCUMULATOR_WORKER_COUNT", "4"),
        ]))
        .unwrap();

        assert_eq!(config.session.capacity, 3);
        assert_eq!(config.storage.backend, SinkKind::Sqlite);
        assert_eq!(config.storage.sqlite_path, PathBuf::from("/tmp/s.sqlite"));
        assert!(config.cache.enabled);
        assert_eq!(config.writer.worker_count, 4);
        assert_eq!(config.session.cache_max_len, 100);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result =
            AccumulatorConfig::from_lookup(lookup_from(&[("ACCUMULATOR_CAPACITY", "lots")]));
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }
}
