//! In-memory ring buffer of structured log entries, exposed via the
//! `/logs` endpoint. Installed as a [`tracing_subscriber::Layer`] so it
//! captures exactly what the JSON-formatted stdout log sees.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
    pub job_id: Option<String>,
    pub correlation_id: Option<String>,
}

pub struct LogRingBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogRingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent entries first, optionally filtered by level and job id.
    pub fn tail(&self, level: Option<&str>, job_id: Option<&str>, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .iter()
            .rev()
            .filter(|e| level.is_none_or(|l| e.level.eq_ignore_ascii_case(l)))
            .filter(|e| job_id.is_none_or(|j| e.job_id.as_deref() == Some(j)))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    job_id: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "job_id" => self.job_id = Some(format!("{value:?}").trim_matches('"').to_string()),
            _ => {}
        }
    }
}

/// A `tracing_subscriber::Layer` that mirrors every event into a
/// [`LogRingBuffer`] rather than an output stream.
pub struct LogBufferLayer {
    buffer: std::sync::Arc<LogRingBuffer>,
}

impl LogBufferLayer {
    pub fn new(buffer: std::sync::Arc<LogRingBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let level = match *event.metadata().level() {
            Level::ERROR => "error",
            Level::WARN => "warn",
            Level::INFO => "info",
            Level::DEBUG => "debug",
            Level::TRACE => "trace",
        };

        self.buffer.push(LogEntry {
            timestamp: Utc::now(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            job_id: visitor.job_id,
            correlation_id: super::middleware::current_correlation_id(),
        });
    }
}
