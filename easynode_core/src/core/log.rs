//! Log sink consumed by the node runtime
//!
//! Nodes never print directly: every line goes through a [`LogSink`], which by
//! default forwards to the `log` facade so the host application decides where
//! lines end up.

use log::Level;
use parking_lot::Mutex;
use std::sync::Arc;

/// Destination for node log lines
pub trait LogSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);
}

/// Forwards to the `log` crate under the target `easynode::<node>`
#[derive(Debug, Clone)]
pub struct LogCrateSink {
    target: String,
}

impl LogCrateSink {
    pub fn new(node_name: &str) -> Self {
        Self {
            target: format!("easynode::{}", node_name),
        }
    }
}

impl LogSink for LogCrateSink {
    fn emit(&self, level: Level, message: &str) {
        log::log!(target: self.target.as_str(), level, "{}", message);
    }
}

/// Keeps every emitted line in memory; handy for assertions in tests
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    lines: Arc<Mutex<Vec<(Level, String)>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }

    /// Whether any line at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(l, line)| *l == level && line.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn emit(&self, level: Level, message: &str) {
        self.lines.lock().push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records() {
        let sink = MemoryLogSink::new();
        sink.emit(Level::Info, "detector | on_init (default)");
        sink.emit(Level::Error, "detector | boom");

        assert_eq!(sink.lines().len(), 2);
        assert!(sink.contains(Level::Info, "on_init"));
        assert!(!sink.contains(Level::Info, "boom"));
        assert!(sink.contains(Level::Error, "boom"));
    }

    #[test]
    fn test_log_crate_sink_target() {
        let sink = LogCrateSink::new("detector");
        assert_eq!(sink.target, "easynode::detector");
        sink.emit(Level::Debug, "no logger installed, line is discarded");
    }
}
