//! # Injected Logging Capability
//!
//! The bus and its pipeline never call `tracing` directly. Every record goes
//! through a [`LogSink`] supplied at construction; [`TracingSink`] is the
//! production sink and [`MemorySink`] records for assertions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Severity of a bus log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[serde(alias = "debug")]
    Debug,
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warn")]
    Warn,
    #[serde(alias = "error")]
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    /// Short machine-readable event name, e.g. `delivery_exhausted`.
    pub event: &'static str,
    pub topic: Option<String>,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, event: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            event,
            topic: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }
}

/// Destination for bus log records.
pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);

    /// Whether records at `level` would be kept.
    fn enabled(&self, _level: LogLevel) -> bool {
        true
    }
}

/// Forwards records to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, record: LogRecord) {
        let topic = record.topic.as_deref().unwrap_or("-");
        match record.level {
            LogLevel::Debug => {
                tracing::debug!(event = record.event, topic, "{}", record.message)
            }
            LogLevel::Info => tracing::info!(event = record.event, topic, "{}", record.message),
            LogLevel::Warn => tracing::warn!(event = record.event, topic, "{}", record.message),
            LogLevel::Error => {
                tracing::error!(event = record.event, topic, "{}", record.message)
            }
        }
    }
}

/// Drops records below a minimum level. `ERROR` always passes.
pub struct LevelFilter {
    min: LogLevel,
    inner: Arc<dyn LogSink>,
}

impl LevelFilter {
    pub fn new(min: LogLevel, inner: Arc<dyn LogSink>) -> Self {
        Self { min, inner }
    }
}

impl LogSink for LevelFilter {
    fn log(&self, record: LogRecord) {
        if self.enabled(record.level) {
            self.inner.log(record);
        }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        (level >= self.min || level == LogLevel::Error) && self.inner.enabled(level)
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records with the given event name.
    pub fn events(&self, event: &str) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event == event)
            .cloned()
            .collect()
    }

    pub fn count_at(&self, level: LogLevel) -> usize {
        self.records.lock().iter().filter(|r| r.level == level).count()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}
