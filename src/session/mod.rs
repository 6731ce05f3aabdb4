//! Session state accumulator.
//!
//! Accumulates one real-time session's messages and participants in memory,
//! optionally mirrors messages to a shared cache and flushes to a durable
//! sink: per turn in the background, and once, awaited, at session end.

pub mod cache;
pub mod core;
pub mod delivery;
pub mod engine;
pub mod sink;
pub mod state;

pub use cache::{CacheClient, CacheMirror, InMemoryCacheClient, MirrorStatus, RedisCacheClient};
pub use self::core::{
    AccumulatorConfig, ConversationId, LifecycleState, Message, Role, SessionConfig,
    SessionContext, SessionError, SessionId, SessionResult, SessionWarning, SessionWarnings,
};
pub use delivery::{DrainReport, DurableWriter, EnqueueOutcome, RetryPolicy, WriterStats};
pub use engine::{
    DurabilityStatus, EventOutcome, SessionBackends, SessionEvent, SessionLifecycleController,
    SessionManager, SessionSummary,
};
pub use sink::{DurableSink, HttpSink, InMemorySink, SqliteSink};
pub use state::{MessageLog, ParticipantRegistry};

use tracing_subscriber::EnvFilter;

/// Install a formatted tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling it again
/// once a subscriber is installed does nothing.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
