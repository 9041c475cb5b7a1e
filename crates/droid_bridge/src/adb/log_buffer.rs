//! Capacity-bounded, monotonically keyed storage for captured log lines

use chrono::{DateTime, Local};
use std::collections::VecDeque;

/// Severity marker applied to every captured line. The capture stream does
/// not distinguish levels; the field keeps `LogEntry` uniform with other log
/// sources.
pub const CAPTURE_LEVEL: &str = "ALL";

/// One captured output line, stamped with the wall-clock time of receipt
/// (never the device's own clock).
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: &'static str,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level: CAPTURE_LEVEL,
            message: message.into(),
        }
    }
}

/// Ring buffer keyed by a monotonically increasing index. Each insertion
/// uses the current highest key plus one (0 when empty); the oldest entry is
/// evicted once the capacity is exceeded.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<(u64, LogEntry)>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Inserts an entry under the next key and returns that key.
    pub fn insert(&mut self, entry: LogEntry) -> u64 {
        let key = self.entries.back().map(|(k, _)| k + 1).unwrap_or(0);
        self.entries.push_back((key, entry));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        key
    }

    /// Entries with keys strictly greater than `cursor`, oldest first, along
    /// with the highest key among them. A `None` cursor selects everything
    /// currently buffered. Entries evicted before ever being selected are
    /// gone; the caller sees neither gaps nor duplicates otherwise.
    pub fn newer_than(&self, cursor: Option<u64>) -> (Vec<LogEntry>, Option<u64>) {
        let mut fresh = Vec::new();
        let mut latest = None;
        for (key, entry) in self.entries.iter().rev() {
            if cursor.is_some_and(|c| *key <= c) {
                break;
            }
            if latest.is_none() {
                latest = Some(*key);
            }
            fresh.push(entry.clone());
        }
        fresh.reverse();
        (fresh, latest)
    }

    /// Every retained entry, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().map(|(_, entry)| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
