//! Transaction log derived from progress events.
//!
//! The journal is what a user reads: a timestamped, leveled, append-only list
//! of messages. It is rebuilt from events and never consulted for job state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::TransferStatus;
use crate::progress::ProgressEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Warn,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Success => write!(f, "SUCCESS"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warn => write!(f, "WARN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }

    /// Render a job event the way the transfer log shows it.
    ///
    /// `destination_name` is the display name of the drop target; the event
    /// itself only carries the job id.
    pub fn from_event(event: &ProgressEvent, destination_name: &str) -> Self {
        let (level, message) = match event.status {
            Some(TransferStatus::Completed) => (
                LogLevel::Success,
                format!(
                    "Successfully transferred {} to {}.",
                    event.file_name, destination_name
                ),
            ),
            Some(TransferStatus::Failed) => (
                LogLevel::Error,
                format!("Transfer failed for {}: {}", event.file_name, event.message),
            ),
            _ => (
                LogLevel::Info,
                format!("[{}] {}", destination_name, event.message),
            ),
        };
        LogEntry {
            timestamp: event.timestamp,
            level,
            message,
        }
    }
}

/// Append-only list of log entries.
#[derive(Debug, Default, Clone)]
pub struct TransactionLog {
    entries: Vec<LogEntry>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) -> &LogEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn info(&mut self, message: impl Into<String>) -> &LogEntry {
        self.push(LogEntry::new(LogLevel::Info, message))
    }

    pub fn success(&mut self, message: impl Into<String>) -> &LogEntry {
        self.push(LogEntry::new(LogLevel::Success, message))
    }

    pub fn warn(&mut self, message: impl Into<String>) -> &LogEntry {
        self.push(LogEntry::new(LogLevel::Warn, message))
    }

    pub fn error(&mut self, message: impl Into<String>) -> &LogEntry {
        self.push(LogEntry::new(LogLevel::Error, message))
    }

    pub fn record_event(&mut self, event: &ProgressEvent, destination_name: &str) -> &LogEntry {
        self.push(LogEntry::from_event(event, destination_name))
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
