//! Hosts many concurrent sessions over shared backends.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::session::cache::{CacheClient, CacheMirror, RedisCacheClient};
use crate::session::core::config::{AccumulatorConfig, SinkKind};
use crate::session::core::errors::{SessionError, SessionResult};
use crate::session::core::ids::SessionId;
use crate::session::delivery::retry::RetryPolicy;
use crate::session::delivery::write_queue::{DrainReport, DurableWriter, WriterStats};
use crate::session::engine::controller::SessionLifecycleController;
use crate::session::engine::events::{EventOutcome, SessionEvent};
use crate::session::sink::{DurableSink, HttpSink, InMemorySink, SqliteSink};

/// Backend dependencies shared by every session.
pub struct SessionBackends {
    /// Durable sink implementation.
    pub sink: Arc<dyn DurableSink>,
    /// Optional shared cache client.
    pub cache: Option<Arc<dyn CacheClient>>,
}

impl SessionBackends {
    /// Build the configured sink and cache client.
    ///
    /// # Errors
    /// Returns an error if a backend cannot be initialized.
    pub async fn from_config(config: &AccumulatorConfig) -> SessionResult<Self> {
        let sink: Arc<dyn DurableSink> = match config.storage.backend {
            SinkKind::Memory => Arc::new(InMemorySink::new()),
            SinkKind::Sqlite => Arc::new(SqliteSink::new(&config.storage).await?),
            SinkKind::Http => Arc::new(HttpSink::new(&config.backend)?),
        };

        let cache: Option<Arc<dyn CacheClient>> = if config.cache.enabled {
            let url = config.cache.redis_url.as_deref().ok_or_else(|| {
                SessionError::InvalidConfig("cache enabled without redis_url".to_string())
            })?;
            Some(Arc::new(RedisCacheClient::connect(url).await?))
        } else {
            None
        };

        Ok(Self { sink, cache })
    }

    /// In-process sink, no cache.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            sink: Arc::new(InMemorySink::new()),
            cache: None,
        }
    }
}

type SharedController = Arc<Mutex<SessionLifecycleController>>;

/// Routes events to per-session controllers.
///
/// Sessions are isolated from each other; only the sink, the cache client and
/// the background writer are shared. A session is removed once it has ended.
pub struct SessionManager {
    config: AccumulatorConfig,
    sink: Arc<dyn DurableSink>,
    writer: Arc<DurableWriter>,
    mirror: CacheMirror,
    sessions: DashMap<SessionId, SharedController>,
}

impl SessionManager {
    /// Create a manager and start its background writer.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: AccumulatorConfig, backends: SessionBackends) -> SessionResult<Self> {
        config.validate()?;
        let policy = RetryPolicy::per_turn(&config.session, &config.writer);
        let writer = Arc::new(DurableWriter::spawn(
            Arc::clone(&backends.sink),
            &config.writer,
            policy,
        ));
        let mirror = backends.cache.map_or_else(CacheMirror::disabled, |client| {
            CacheMirror::new(client, &config.cache, &config.session)
        });

        info!(
            sink = ?config.storage.backend,
            cache = mirror.is_enabled(),
            capacity = config.session.capacity,
            "Session manager ready"
        );
        Ok(Self {
            config,
            sink: backends.sink,
            writer,
            mirror,
            sessions: DashMap::new(),
        })
    }

    /// Create a manager with backends built from `config`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or backends cannot be
    /// initialized.
    pub async fn from_config(config: AccumulatorConfig) -> SessionResult<Self> {
        config.validate()?;
        let backends = SessionBackends::from_config(&config).await?;
        Self::new(config, backends)
    }

    fn new_controller(&self) -> SessionLifecycleController {
        SessionLifecycleController::new(
            self.config.session.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.writer),
            self.mirror.clone(),
        )
    }

    /// Apply `event` to its session.
    ///
    /// A start event creates the session; any other event for a session the
    /// manager does not host fails with [`SessionError::UnknownSession`].
    ///
    /// # Errors
    /// Returns the controller's error, or `UnknownSession`.
    pub async fn handle(&self, event: SessionEvent) -> SessionResult<EventOutcome> {
        let session_id = event.session_id().clone();
        let controller = if matches!(event, SessionEvent::Start { .. }) {
            Arc::clone(
                self.sessions
                    .entry(session_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(self.new_controller())))
                    .value(),
            )
        } else {
            self.sessions
                .get(&session_id)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| SessionError::UnknownSession(session_id.clone()))?
        };

        debug!(session_id = %session_id, event = event.name(), "Applying session event");
        let outcome = controller.lock().await.apply(event).await?;
        if matches!(outcome, EventOutcome::Ended { .. }) {
            self.sessions.remove(&session_id);
        }
        Ok(outcome)
    }

    /// Number of hosted sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Background writer counters.
    #[must_use]
    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    /// Shared durable sink.
    #[must_use]
    pub const fn sink(&self) -> &Arc<dyn DurableSink> {
        &self.sink
    }

    /// Wait for pending per-turn writes, then stop the writer.
    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        if !self.sessions.is_empty() {
            info!(open = self.sessions.len(), "Shutting down with open sessions");
        }
        self.writer.shutdown(grace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::core::ids::ConversationId;
    use crate::session::core::message::Role;

    fn start(id: &str, conversation: &str) -> SessionEvent {
        SessionEvent::Start {
            session_id: SessionId::new(id),
            conversation_id: Some(ConversationId::new(conversation)),
            hydrate: false,
        }
    }

    fn turn(id: &str, content: &str) -> SessionEvent {
        SessionEvent::Turn {
            session_id: SessionId::new(id),
            role: Role::User,
            content: content.to_string(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = SessionManager::new(AccumulatorConfig::default(), SessionBackends::in_memory()).unwrap();
        manager.handle(start("s1", "c1")).await.unwrap();
        manager.handle(start("s2", "c2")).await.unwrap();
        manager.handle(turn("s1", "a")).await.unwrap();
        let outcome = manager.handle(turn("s2", "b")).await.unwrap();

        let EventOutcome::Recorded { message } = outcome else {
            panic!("expected a recorded turn");
        };
        assert_eq!(message.sequence, 1);
        assert_eq!(manager.active_sessions(), 2);
    }

    #[tokio::test]
    async fn test_end_removes_session() {
        let manager = SessionManager::new(AccumulatorConfig::default(), SessionBackends::in_memory()).unwrap();
        manager.handle(start("s1", "c1")).await.unwrap();
        manager.handle(turn("s1", "hello")).await.unwrap();
        let outcome = manager
            .handle(SessionEvent::End {
                session_id: SessionId::new("s1"),
            })
            .await
            .unwrap();

        let EventOutcome::Ended { summary } = outcome else {
            panic!("expected an ended session");
        };
        assert_eq!(summary.messages.len(), 1);
        assert_eq!(manager.active_sessions(), 0);

        let report = manager.shutdown(Duration::from_secs(1)).await;
        assert!(report.completed);
        let stored = manager
            .sink()
            .read_recent_messages(&ConversationId::new("c1"), 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let manager = SessionManager::new(AccumulatorConfig::default(), SessionBackends::in_memory()).unwrap();
        let err = manager.handle(turn("nope", "hi")).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_duplicate_start_is_invalid_state() {
        let manager = SessionManager::new(AccumulatorConfig::default(), SessionBackends::in_memory()).unwrap();
        manager.handle(start("s1", "c1")).await.unwrap();
        let err = manager.handle(start("s1", "c1")).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = AccumulatorConfig::default();
        config.writer.worker_count = 0;
        let result = SessionManager::new(config, SessionBackends::in_memory());
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }
}
