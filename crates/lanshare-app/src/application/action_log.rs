//! Bounded log of user-visible notifications.

use std::collections::VecDeque;
use std::time::SystemTime;

use tracing::debug;

/// Entries kept before the oldest is discarded.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub at: SystemTime,
    pub level: ActionLevel,
    pub message: String,
}

#[derive(Debug)]
pub struct ActionLog {
    entries: VecDeque<Action>,
    capacity: usize,
    accepting: bool,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
            accepting: true,
        }
    }

    /// Appends an entry, evicting the oldest when full.  Returns `false` if
    /// the log has stopped accepting entries.
    pub fn record(&mut self, level: ActionLevel, message: impl Into<String>) -> bool {
        let message = message.into();
        if !self.accepting {
            debug!("action dropped after shutdown: {message}");
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Action {
            at: SystemTime::now(),
            level,
            message,
        });
        true
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &Action> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }
}
