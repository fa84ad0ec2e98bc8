//! Script log output.
//!
//! Everything a script logs goes to a [`LogSink`] under the channel
//! `Script[<id>]`. The default sink forwards to `tracing`.

use openmod_js_runtime::ScriptId;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, trace, warn};

/// Severity of a script log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for script log lines.
pub trait LogSink: Send + Sync {
    fn log(&self, channel: &str, level: LogLevel, message: &str);
}

/// Sink that emits `tracing` events with a `channel` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, channel: &str, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => trace!(channel = %channel, "{}", message),
            LogLevel::Debug => debug!(channel = %channel, "{}", message),
            LogLevel::Info => info!(channel = %channel, "{}", message),
            LogLevel::Warn => warn!(channel = %channel, "{}", message),
            LogLevel::Error => error!(channel = %channel, "{}", message),
            LogLevel::Critical => {
                error!(channel = %channel, severity = "critical", "{}", message)
            }
        }
    }
}

/// A captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub channel: String,
    pub level: LogLevel,
    pub message: String,
}

/// Sink that keeps every line in memory.
///
/// Useful for surfacing script output in an admin view, and in tests.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured lines, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Captured lines for one channel.
    pub fn channel(&self, channel: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.channel == channel)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, channel: &str, level: LogLevel, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                channel: channel.to_string(),
                level,
                message: message.to_string(),
            });
        }
    }
}

/// Logger bound to one script's channel.
#[derive(Clone)]
pub struct ScriptLogger {
    channel: String,
    sink: Arc<dyn LogSink>,
}

impl ScriptLogger {
    pub fn new(script_id: &ScriptId, sink: Arc<dyn LogSink>) -> Self {
        Self {
            channel: script_id.log_channel(),
            sink,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.sink.log(&self.channel, level, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }
}

impl fmt::Debug for ScriptLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptLogger")
            .field("channel", &self.channel)
            .finish()
    }
}
