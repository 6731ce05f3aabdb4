//! Bounded, insertion-ordered message history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::session::core::message::{Message, Role};

/// Append-only message log that keeps the most recent `capacity` messages.
///
/// The retained messages are always a contiguous suffix of everything ever
/// appended. `capacity == 0` retains nothing but still counts appends, which
/// is the pass-through mode where the durable sink is the only history.
#[derive(Clone, Debug)]
pub struct MessageLog {
    retained: VecDeque<Message>,
    capacity: usize,
    total_appended: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MessageLog {
    /// Create an empty log.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            retained: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            total_appended: 0,
            last_timestamp: None,
        }
    }

    /// Append a message stamped with the current time.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Message {
        self.append_at(role, content, Utc::now())
    }

    /// Append a message carrying host metadata, stamped with the current time.
    pub fn append_with_metadata(
        &mut self,
        role: Role,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Message {
        self.push(role, content, metadata, Utc::now())
    }

    /// Append a message stamped with `now`.
    ///
    /// The stored timestamp never goes backwards relative to the previous
    /// message, even if the wall clock does.
    pub fn append_at(
        &mut self,
        role: Role,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Message {
        self.push(role, content, None, now)
    }

    fn push(
        &mut self,
        role: Role,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Message {
        let timestamp = self.last_timestamp.map_or(now, |last| last.max(now));
        self.total_appended += 1;
        self.last_timestamp = Some(timestamp);

        let message =
            Message::new(role, content, timestamp, self.total_appended).with_metadata(metadata);
        self.retain(message.clone());
        message
    }

    /// Pre-populate the log with history read from the durable sink.
    ///
    /// Messages are ordered by sequence; those at or below the current
    /// counter are skipped. The counter moves to the highest hydrated
    /// sequence so later appends continue the conversation's numbering.
    /// Returns the number of messages accepted.
    pub fn hydrate(&mut self, mut history: Vec<Message>) -> usize {
        history.sort_by_key(|message| message.sequence);
        let mut accepted = 0;
        for message in history {
            if message.sequence <= self.total_appended {
                continue;
            }
            self.total_appended = message.sequence;
            self.last_timestamp = Some(
                self.last_timestamp
                    .map_or(message.timestamp, |last| last.max(message.timestamp)),
            );
            self.retain(message);
            accepted += 1;
        }
        accepted
    }

    fn retain(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        self.retained.push_back(message);
        while self.retained.len() > self.capacity {
            self.retained.pop_front();
        }
    }

    /// Owned copy of the retained messages, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.retained.iter().cloned().collect()
    }

    /// Number of retained messages.
    #[must_use]
    pub fn size(&self) -> usize {
        self.retained.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Retention cap.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Count of all messages ever appended or hydrated, including trimmed ones.
    #[must_use]
    pub const fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Drop all retained messages. The counter is kept.
    pub fn clear(&mut self) {
        self.retained.clear();
    }
}
