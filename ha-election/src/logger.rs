//! Leveled logging interface used by the worker core.
//!
//! Content is arbitrary structured data (`serde_json::Value`). The default
//! [`TracingLogger`] flattens it to `(key=value&key=value)` text and emits
//! it through `tracing`; applications may inject their own sink.

use serde_json::Value;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub trait HaLogger: Send + Sync {
    fn log(&self, level: LogLevel, content: Value);

    fn debug(&self, content: Value) {
        self.log(LogLevel::Debug, content);
    }

    fn info(&self, content: Value) {
        self.log(LogLevel::Info, content);
    }

    fn warn(&self, content: Value) {
        self.log(LogLevel::Warn, content);
    }

    fn error(&self, content: Value) {
        self.log(LogLevel::Error, content);
    }
}

/// Flatten structured content into a single human-readable line.
///
/// Maps and arrays render as `(k=v&k=v)` (array keys are indices), nested
/// recursively; strings render bare; null renders empty.
pub fn render(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => {
            let pairs: Vec<String> = items
                .iter()
                .enumerate()
                .map(|(i, v)| format!("{}={}", i, render(v)))
                .collect();
            format!("({})", pairs.join("&"))
        }
        Value::Object(map) => {
            let pairs: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}={}", k, render(v)))
                .collect();
            format!("({})", pairs.join("&"))
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl HaLogger for TracingLogger {
    fn log(&self, level: LogLevel, content: Value) {
        let line = render(&content);
        match level {
            LogLevel::Debug => tracing::debug!(target: "ha_election", "{}", line),
            LogLevel::Info => tracing::info!(target: "ha_election", "{}", line),
            LogLevel::Warn => tracing::warn!(target: "ha_election", "{}", line),
            LogLevel::Error => tracing::error!(target: "ha_election", "{}", line),
        }
    }
}

/// Keeps every record in memory. Handy for asserting on what a worker logged.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<(LogLevel, Value)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(LogLevel, Value)> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Records at `level` whose `event` field equals `event`.
    pub fn events(&self, level: LogLevel, event: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|(l, v)| *l == level && v.get("event").and_then(Value::as_str) == Some(event))
            .map(|(_, v)| v)
            .collect()
    }
}

impl HaLogger for MemoryLogger {
    fn log(&self, level: LogLevel, content: Value) {
        if let Ok(mut records) = self.records.lock() {
            records.push((level, content));
        }
    }
}
