//! Bounded, append-only buffer of recent session log entries.
//!
//! Readers pull snapshots with [`LogBuffer::entries`] or subscribe to a
//! channel that receives the full snapshot after every append.  Subscriber
//! channels are bounded; a full channel misses that update rather than
//! stalling the session.

use std::collections::VecDeque;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::types::{LogEntry, LogLevel};

/// Default number of retained entries.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    subscribers: Mutex<Vec<Sender<Vec<LogEntry>>>>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogBuffer {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, evicting the oldest one when full, and forward it to
    /// the `log` facade under target `mc_session::<scope>`.
    pub fn append(&self, scope: &str, message: impl Into<String>, level: LogLevel) {
        let entry = LogEntry::new(scope, message, level);
        forward(&entry);

        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);

        // Still under the entries lock so subscribers see snapshots in
        // append order.  `try_send` never blocks.
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        let snapshot: Vec<LogEntry> = entries.iter().cloned().collect();
        subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn info(&self, scope: &str, message: impl Into<String>) {
        self.append(scope, message, LogLevel::Info);
    }

    pub fn warn(&self, scope: &str, message: impl Into<String>) {
        self.append(scope, message, LogLevel::Warning);
    }

    pub fn error(&self, scope: &str, message: impl Into<String>) {
        self.append(scope, message, LogLevel::Error);
    }

    pub fn success(&self, scope: &str, message: impl Into<String>) {
        self.append(scope, message, LogLevel::Success);
    }

    /// Ordered snapshot, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive the full snapshot after each append.  Dropping the receiver
    /// unsubscribes on the next append.
    pub fn subscribe(&self, buffer: usize) -> Receiver<Vec<LogEntry>> {
        let (tx, rx) = crossbeam_channel::bounded(buffer.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

fn forward(entry: &LogEntry) {
    let target = format!("mc_session::{}", entry.scope.to_lowercase());
    let level = match entry.level {
        LogLevel::Info | LogLevel::Success => log::Level::Info,
        LogLevel::Warning => log::Level::Warn,
        LogLevel::Error => log::Level::Error,
    };
    log::log!(target: &target, level, "{}", entry.message);
}
