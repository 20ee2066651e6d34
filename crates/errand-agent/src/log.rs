//! Session log entries and the sink the loop writes them to.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The action/target pair shown for a step, as the log reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub action: String,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StepRecord {
    pub fn new(action: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: target.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// What happened. Serialized with a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// A step started
    Step { step: StepRecord, status: String },
    /// A step finished
    StepComplete { step: StepRecord },
    Info { message: String },
    Error { error: String },
}

impl LogEvent {
    pub fn running(step: StepRecord) -> Self {
        Self::Step {
            step,
            status: "running".into(),
        }
    }

    pub fn complete(step: StepRecord) -> Self {
        Self::StepComplete { step }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }
}

/// A timestamped event, flattened on the wire:
/// `{"timestamp": "...", "type": "info", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LogEvent,
}

impl LogEntry {
    pub fn now(event: LogEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Append-only destination for log events.
pub trait LogSink: Send + Sync {
    fn append(&self, event: LogEvent);
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.entries().into_iter().map(|e| e.event).collect()
    }
}

impl LogSink for MemoryLog {
    fn append(&self, event: LogEvent) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry::now(event));
        }
    }
}
