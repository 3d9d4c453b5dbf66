//! Event construction and emission.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::id::EventIdGenerator;
use crate::events::sink::EventSink;
use crate::observability::tracing::RequestContext;

/// Free-form structured event metadata.
pub type Metadata = Map<String, Value>;

/// Supplies the correlation id for the event being built.
pub type CorrelationSupplier = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CircuitStateChange,
    RetryAttempt,
    Timeout,
    RateLimitHit,
    BulkheadRejection,
    HealthChange,
    PolicyChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CircuitStateChange => "circuit_state_change",
            EventType::RetryAttempt => "retry_attempt",
            EventType::Timeout => "timeout",
            EventType::RateLimitHit => "rate_limit_hit",
            EventType::BulkheadRejection => "bulkhead_rejection",
            EventType::HealthChange => "health_change",
            EventType::PolicyChange => "policy_change",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operational event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// An operator-facing record of a management action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(flatten)]
    pub event: ResilienceEvent,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Builds context-enriched events and forwards them to a sink.
///
/// Without a sink, emission is a no-op. Components hold an
/// `Option<Arc<EventBuilder>>`; see [`EmitExt`] for the absent case.
pub struct EventBuilder {
    service_name: String,
    ids: EventIdGenerator,
    correlation: Option<CorrelationSupplier>,
    sink: Option<Arc<dyn EventSink>>,
}

impl EventBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ids: EventIdGenerator::new(),
            correlation: None,
            sink: None,
        }
    }

    pub fn with_correlation<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.correlation = Some(Arc::new(supplier));
        self
    }

    /// Read correlation ids from the task-local request context.
    pub fn with_request_correlation(self) -> Self {
        self.with_correlation(|| RequestContext::current_correlation_id().unwrap_or_default())
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn build(&self, event_type: EventType, metadata: Metadata) -> ResilienceEvent {
        let trace = RequestContext::current_trace();
        ResilienceEvent {
            id: self.ids.next_id().to_string(),
            event_type,
            service_name: self.service_name.clone(),
            timestamp: Utc::now(),
            correlation_id: self.correlation.as_ref().map(|f| f()).unwrap_or_default(),
            trace_id: trace.as_ref().map(|t| t.trace_id.clone()),
            span_id: trace.map(|t| t.span_id),
            metadata,
        }
    }

    pub fn build_audit(
        &self,
        event_type: EventType,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
        metadata: Metadata,
    ) -> AuditEvent {
        AuditEvent {
            event: self.build(event_type, metadata),
            action: action.into(),
            resource: resource.into(),
            outcome,
            actor: None,
        }
    }

    pub fn emit(&self, event: ResilienceEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(&event);
        }
    }

    pub fn emit_audit(&self, event: AuditEvent) {
        if let Some(sink) = &self.sink {
            sink.emit_audit(&event);
        }
    }

    /// Build and emit in one step.
    pub fn record(&self, event_type: EventType, metadata: Metadata) {
        if self.sink.is_some() {
            self.emit(self.build(event_type, metadata));
        }
    }
}

impl fmt::Debug for EventBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuilder")
            .field("service_name", &self.service_name)
            .field("has_correlation", &self.correlation.is_some())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

/// Emission through a builder that may be absent.
pub trait EmitExt {
    fn record(&self, event_type: EventType, metadata: Metadata);
    fn emit(&self, event: ResilienceEvent);
    fn emit_audit(&self, event: AuditEvent);
}

impl<B: AsRef<EventBuilder>> EmitExt for Option<B> {
    fn record(&self, event_type: EventType, metadata: Metadata) {
        if let Some(builder) = self {
            builder.as_ref().record(event_type, metadata);
        }
    }

    fn emit(&self, event: ResilienceEvent) {
        if let Some(builder) = self {
            builder.as_ref().emit(event);
        }
    }

    fn emit_audit(&self, event: AuditEvent) {
        if let Some(builder) = self {
            builder.as_ref().emit_audit(event);
        }
    }
}

impl AsRef<EventBuilder> for EventBuilder {
    fn as_ref(&self) -> &EventBuilder {
        self
    }
}

/// Shorthand for building a metadata map.
#[macro_export]
macro_rules! metadata {
    () => { $crate::events::Metadata::new() };
    ($($key:literal => $value:expr),+ $(,)?) => {{
        let mut map = $crate::events::Metadata::new();
        $( map.insert($key.to_string(), ::serde_json::json!($value)); )+
        map
    }};
}
