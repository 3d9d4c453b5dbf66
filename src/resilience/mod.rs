//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! executor.rs: ResilienceExecutor::execute(policy, ctx, work)
//!     → lifecycle drain gate (refuse while draining)
//!     → rate_limit/ (token bucket or sliding window, per key)
//!     → bulkhead.rs (slot in the caller's partition, bounded queue)
//!     → retries.rs (attempt loop, backoff.rs delays)
//!         → circuit_breaker.rs (fail fast while open, probe when half-open)
//!         → timeouts.rs (per-attempt timeout)
//!     → timeouts.rs (caller deadline around all of the above)
//! ```
//!
//! Every guard is an independently owned instance; none of them share
//! process-wide state. Failures are reported as [`ResilienceError`].

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod error;
pub mod executor;
pub mod rate_limit;
pub mod retries;
pub mod timeouts;

pub use bulkhead::{Bulkhead, BulkheadManager, BulkheadMetrics, BulkheadPermit};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitPermit, CircuitState};
pub use error::{ErrorKind, ProtocolStatus, ResilienceError, ResilienceResult};
pub use executor::{ExecutionContext, ResilienceExecutor};
pub use rate_limit::{
    build_rate_limiter, RateLimitAlgorithm, RateLimitDecision, RateLimitHeaders, RateLimiter,
};
pub use retries::RetryExecutor;
