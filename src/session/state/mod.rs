//! In-memory session state: message history and participant roster.

pub mod message_log;
pub mod participants;

pub use message_log::MessageLog;
pub use participants::{
    JoinOutcome, LeaveOutcome, ParticipantEntry, ParticipantRegistry, ParticipantSnapshot,
};
