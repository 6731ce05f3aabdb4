//! Session orchestration: lifecycle controller, events and multi-session manager.

pub mod controller;
pub mod events;
pub mod manager;
pub mod summary;

pub use controller::SessionLifecycleController;
pub use events::{EventOutcome, SessionEvent};
pub use manager::{SessionBackends, SessionManager};
pub use summary::{DurabilityStatus, SessionSummary};
