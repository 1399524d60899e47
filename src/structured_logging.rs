//! Structured logging and the bounded activity log
//!
//! Every entry appended to the [`ActivityLog`] is mirrored into `tracing`.
//! The log keeps only the most recent entries; dropping old ones is routine.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use uuid::Uuid;

use crate::types::ActionKind;

pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Human-readable record of an action or outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Uuid>,
    pub message: String,
}

/// Append-only log holding the most recent `capacity` entries
#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn append(&self, level: LogLevel, operation_id: Option<Uuid>, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(operation_id = ?operation_id, "{}", message),
            LogLevel::Warn => tracing::warn!(operation_id = ?operation_id, "{}", message),
            LogLevel::Error => tracing::error!(operation_id = ?operation_id, "{}", message),
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            operation_id,
            message,
        });
    }

    pub fn info(&self, operation_id: Option<Uuid>, message: impl Into<String>) {
        self.append(LogLevel::Info, operation_id, message);
    }

    pub fn warn(&self, operation_id: Option<Uuid>, message: impl Into<String>) {
        self.append(LogLevel::Warn, operation_id, message);
    }

    pub fn error(&self, operation_id: Option<Uuid>, message: impl Into<String>) {
        self.append(LogLevel::Error, operation_id, message);
    }

    /// Read-only copy of the feed, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Per-action tracing context
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation_id: Uuid,
    pub action: ActionKind,
    started: Instant,
}

impl OperationContext {
    pub fn new(action: ActionKind) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            action,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn log_submitted(&self, instructions: usize) {
        tracing::debug!(
            operation_id = %self.operation_id,
            action = %self.action,
            instructions = instructions,
            "Submitting transaction"
        );
    }

    pub fn log_confirmed(&self, signature: &str) {
        tracing::info!(
            operation_id = %self.operation_id,
            action = %self.action,
            signature = %signature,
            latency_ms = self.elapsed_ms(),
            "Transaction confirmed"
        );
    }

    pub fn log_failure(&self, category: &str, error: &str) {
        tracing::warn!(
            operation_id = %self.operation_id,
            action = %self.action,
            category = %category,
            error = %error,
            latency_ms = self.elapsed_ms(),
            "Action failed"
        );
    }
}
