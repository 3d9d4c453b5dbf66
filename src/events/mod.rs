//! Structured event subsystem.
//!
//! # Data Flow
//! ```text
//! State transition or outcome (breaker, retry, limiter, bulkhead, health)
//!     → builder.rs (id, timestamp, service, correlation, trace ids)
//!     → sink.rs (EventSink: tracing log line, memory, or host-provided)
//! ```
//!
//! # Design Decisions
//! - Identifiers are UUIDv7-shaped so they sort by creation time
//! - Emission never fails and never blocks the caller
//! - An absent builder or sink turns emission into a no-op

pub mod builder;
pub mod id;
pub mod sink;

pub use builder::{
    AuditEvent, AuditOutcome, CorrelationSupplier, EmitExt, EventBuilder, EventType, Metadata,
    ResilienceEvent,
};
pub use id::EventIdGenerator;
pub use sink::{EventSink, MemorySink, TracingEventSink};
