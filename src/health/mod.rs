//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! checks.rs (circuit breakers, bulkheads) ─┐
//! host-provided HealthChecker impls ───────┼→ aggregator.rs → HealthReport
//!                                           │     (worst status wins)
//!                                           └→ health_change event on transition
//! ```

pub mod aggregator;
pub mod checks;

pub use aggregator::{
    aggregate, ComponentHealth, HealthAggregator, HealthChecker, HealthReport, HealthStatus,
};
pub use checks::{BulkheadHealth, CircuitBreakerHealth};
