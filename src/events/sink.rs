//! Event sinks.

use parking_lot::Mutex;

use crate::events::builder::{AuditEvent, ResilienceEvent};

/// Receives events. Emission is fire-and-forget; sinks must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ResilienceEvent);
    fn emit_audit(&self, event: &AuditEvent);
}

/// Writes each event as a JSON log line under the `resilience_events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &ResilienceEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(
                target: "resilience_events",
                event_type = %event.event_type,
                event = %json,
                "Resilience event"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
        }
    }

    fn emit_audit(&self, event: &AuditEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(
                target: "resilience_events",
                action = %event.action,
                resource = %event.resource,
                event = %json,
                "Audit event"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
        }
    }
}

/// Keeps events in memory, for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ResilienceEvent>>,
    audits: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    pub fn audits(&self) -> Vec<AuditEvent> {
        self.audits.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.audits.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }

    fn emit_audit(&self, event: &AuditEvent) {
        self.audits.lock().push(event.clone());
    }
}
