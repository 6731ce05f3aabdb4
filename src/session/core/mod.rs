//! Core session types and identifiers.

pub mod config;
pub mod context;
pub mod errors;
pub mod ids;
pub mod message;

pub use config::{
    AccumulatorConfig, BackendConfig, CacheConfig, SessionConfig, SinkKind, StorageConfig,
    WriterConfig,
};
pub use context::SessionContext;
pub use errors::{LifecycleState, SessionError, SessionResult, SessionWarning, SessionWarnings};
pub use ids::{ConversationId, SessionId};
pub use message::{Message, Role};
