//! Injected sink for connection-lifecycle milestones.
//!
//! Components never reach for a global logger; they are handed an
//! `Arc<dyn LogSink>`. Milestones are observational only and never drive
//! control decisions.

use tokio::sync::mpsc;
use tracing::Level;

pub const LIFECYCLE_TARGET: &str = "cosim_bridge::lifecycle";

pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }
}

/// Forwards milestones to `tracing` under [`LIFECYCLE_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: LIFECYCLE_TARGET, "{message}"),
            Level::WARN => tracing::warn!(target: LIFECYCLE_TARGET, "{message}"),
            Level::INFO => tracing::info!(target: LIFECYCLE_TARGET, "{message}"),
            Level::DEBUG => tracing::debug!(target: LIFECYCLE_TARGET, "{message}"),
            Level::TRACE => tracing::trace!(target: LIFECYCLE_TARGET, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
}

/// Collects milestones through an unbounded channel.
pub struct MemorySink {
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl MemorySink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, message: &str) {
        if self.tx.is_closed() {
            return;
        }
        let _ = self.tx.send(LogRecord {
            level,
            message: message.to_string(),
        });
    }
}

pub fn drain_records(rx: &mut mpsc::UnboundedReceiver<LogRecord>) -> Vec<LogRecord> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}
