//! Participant join/leave tracking.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One join/leave cycle of a participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantEntry {
    /// Join time.
    pub joined_at: DateTime<Utc>,
    /// Leave time; `None` while the entry is open.
    pub left_at: Option<DateTime<Utc>>,
    /// Host-supplied metadata from the join event.
    pub metadata: Option<serde_json::Value>,
}

impl ParticipantEntry {
    /// Whether the participant has not left yet.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Result of a join event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOutcome {
    /// A new open entry was created.
    Joined,
    /// An entry was already open; nothing changed.
    AlreadyPresent,
}

/// Result of a leave event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveOutcome {
    /// The open entry was closed.
    Left,
    /// No open entry existed; nothing changed.
    NotPresent,
}

/// Snapshot type: identity to its join/leave cycles, oldest first.
pub type ParticipantSnapshot = BTreeMap<String, Vec<ParticipantEntry>>;

/// Per-session participant registry.
///
/// An identity may join and leave several times; every cycle is kept as its
/// own entry.
#[derive(Clone, Debug, Default)]
pub struct ParticipantRegistry {
    entries: HashMap<String, Vec<ParticipantEntry>>,
}

impl ParticipantRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an entry for `identity` at the current time.
    pub fn join(&mut self, identity: &str, metadata: Option<serde_json::Value>) -> JoinOutcome {
        self.join_at(identity, metadata, Utc::now())
    }

    /// Open an entry for `identity` at `now`.
    ///
    /// A second join for an identity that is still open keeps the original
    /// `joined_at`.
    pub fn join_at(
        &mut self,
        identity: &str,
        metadata: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> JoinOutcome {
        let cycles = self.entries.entry(identity.to_string()).or_default();
        if cycles.last().is_some_and(ParticipantEntry::is_open) {
            return JoinOutcome::AlreadyPresent;
        }
        cycles.push(ParticipantEntry {
            joined_at: now,
            left_at: None,
            metadata,
        });
        JoinOutcome::Joined
    }

    /// Close the open entry for `identity` at the current time.
    pub fn leave(&mut self, identity: &str) -> LeaveOutcome {
        self.leave_at(identity, Utc::now())
    }

    /// Close the open entry for `identity` at `now`.
    pub fn leave_at(&mut self, identity: &str, now: DateTime<Utc>) -> LeaveOutcome {
        let Some(open) = self
            .entries
            .get_mut(identity)
            .and_then(|cycles| cycles.last_mut())
            .filter(|entry| entry.is_open())
        else {
            return LeaveOutcome::NotPresent;
        };
        open.left_at = Some(now.max(open.joined_at));
        LeaveOutcome::Left
    }

    /// Whether `identity` currently has an open entry.
    #[must_use]
    pub fn is_present(&self, identity: &str) -> bool {
        self.entries
            .get(identity)
            .and_then(|cycles| cycles.last())
            .is_some_and(ParticipantEntry::is_open)
    }

    /// Identities with an open entry, sorted.
    #[must_use]
    pub fn present(&self) -> Vec<String> {
        let mut present: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, cycles)| cycles.last().is_some_and(ParticipantEntry::is_open))
            .map(|(identity, _)| identity.clone())
            .collect();
        present.sort();
        present
    }

    /// Owned copy of every identity and all of its cycles.
    #[must_use]
    pub fn snapshot(&self) -> ParticipantSnapshot {
        self.entries
            .iter()
            .map(|(identity, cycles)| (identity.clone(), cycles.clone()))
            .collect()
    }

    /// Number of distinct identities ever seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no participant was ever seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
