//! Diagnostics sink injected into the tracker and storage backends.
//!
//! The sink only observes; nothing in the subsystem branches on what it logs.

use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Severity of a diagnostics entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Destination for warnings and errors raised by the subsystem.
pub trait DiagnosticsSink: Send + Sync {
    /// Record one entry. `context` carries structured detail when available.
    fn log(&self, level: LogLevel, message: &str, context: Option<&Value>);

    fn debug(&self, message: &str, context: Option<&Value>) {
        self.log(LogLevel::Debug, message, context);
    }

    fn info(&self, message: &str, context: Option<&Value>) {
        self.log(LogLevel::Info, message, context);
    }

    fn warn(&self, message: &str, context: Option<&Value>) {
        self.log(LogLevel::Warn, message, context);
    }

    fn error(&self, message: &str, context: Option<&Value>) {
        self.log(LogLevel::Error, message, context);
    }
}

/// Sink that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Shared handle, convenient for constructors taking `Arc<dyn DiagnosticsSink>`.
    pub fn shared() -> Arc<dyn DiagnosticsSink> {
        Arc::new(Self)
    }
}

impl DiagnosticsSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str, context: Option<&Value>) {
        let context = context.map(Value::to_string).unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(context = %context, "{message}"),
            LogLevel::Info => tracing::info!(context = %context, "{message}"),
            LogLevel::Warn => tracing::warn!(context = %context, "{message}"),
            LogLevel::Error => tracing::error!(context = %context, "{message}"),
        }
    }
}

/// A captured diagnostics entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub context: Option<Value>,
}

/// Sink that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all entries recorded so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Entries at `level` or above.
    pub fn at_least(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level >= level)
            .collect()
    }

    /// Whether any entry's message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }
}

impl DiagnosticsSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str, context: Option<&Value>) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(LogEntry {
                level,
                message: message.to_string(),
                context: context.cloned(),
            });
    }
}
