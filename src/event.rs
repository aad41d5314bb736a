// src/event.rs

//! Reconciliation events
//!
//! Reconcilers report what they did (or failed to do) to an
//! [`EventRecorder`]. Recording is fire-and-forget: a recorder must never
//! fail a reconciliation pass.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// Something that happened to an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Kind of the object the event is about
    pub kind: String,
    /// Name of the object the event is about
    pub name: String,
    pub severity: Severity,
    /// Short machine-readable cause, e.g. `SyncPackage`
    pub reason: String,
    pub message: String,
}

impl Event {
    pub fn normal(
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            severity: Severity::Normal,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn warning(
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::normal(kind, name, reason, message)
        }
    }
}

/// Sink for reconciliation events
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match event.severity {
            Severity::Normal => info!(
                kind = %event.kind,
                name = %event.name,
                reason = %event.reason,
                "{}",
                event.message
            ),
            Severity::Warning => warn!(
                kind = %event.kind,
                name = %event.name,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Recorded events about one object
    pub fn events_for(&self, name: &str) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.name == name).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NopRecorder;

impl EventRecorder for NopRecorder {
    fn record(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_recorder_collects() {
        let recorder = MemoryRecorder::new();
        recorder.record(Event::normal("Provider", "aws", "SyncPackage", "ok"));
        recorder.record(Event::warning("Provider", "gcp", "SyncPackage", "failed"));

        assert_eq!(recorder.events().len(), 2);
        let gcp = recorder.events_for("gcp");
        assert_eq!(gcp.len(), 1);
        assert_eq!(gcp[0].severity, Severity::Warning);

        recorder.clear();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_other_recorders_accept_events() {
        TracingRecorder.record(Event::warning("Provider", "aws", "SyncPackage", "boom"));
        NopRecorder.record(Event::normal("Provider", "aws", "SyncPackage", "ok"));
    }
}
