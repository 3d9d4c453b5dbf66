//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (execution outcomes through MetricsRecorder)
//!     → tracing.rs (task-local correlation id and W3C trace context)
//!
//! Consumers:
//!     → stdout (JSON or pretty)
//!     → Prometheus scrape endpoint, when enabled
//!     → events module picks up correlation and trace ids
//! ```

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::metrics::{ExecutionOutcome, MetricsRecorder, NoopRecorder, PrometheusRecorder};
pub use self::tracing::{RequestContext, TraceContext};
