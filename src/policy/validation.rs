//! Policy validation.
//!
//! Rules per config kind:
//! - counts that size a guard (thresholds, probes, attempts, limits,
//!   concurrency) must be at least 1
//! - durations must be positive
//! - `max_queue` and `burst_size` may be zero
//! - timeout defaults stay within [100ms, 5min]
//! - every duration stays within one day and the version within `i64`, so
//!   any valid policy also encodes as TOML

use std::fmt;

use serde::Serialize;

use crate::policy::schema::{
    BulkheadConfig, CircuitBreakerConfig, Policy, RateLimitConfig, RetryConfig, TimeoutConfig,
};
use crate::resilience::error::{ErrorKind, ResilienceError, ResilienceResult, OPERATION_FAILED};
use crate::resilience::rate_limit::RateLimitAlgorithm;

pub const MIN_TIMEOUT_MS: u64 = 100;
pub const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1_000;
/// Upper bound for every `*_ms` field.
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1_000;
pub const MAX_VERSION: u64 = i64::MAX as u64;

/// One rule a policy breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub reason: String,
}

impl Violation {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.reason)
    }
}

/// Validate a policy, reporting the first violation.
pub fn validate_policy(policy: &Policy) -> ResilienceResult<()> {
    match violations(policy).into_iter().next() {
        Some(v) => Err(ResilienceError::invalid_policy(&policy.name, v.field, v.reason)),
        None => Ok(()),
    }
}

/// Every rule the policy breaks, in field order.
pub fn violations(policy: &Policy) -> Vec<Violation> {
    let mut out = Vec::new();

    if policy.name.trim().is_empty() {
        out.push(Violation::new("name", "must not be empty"));
    }
    if policy.version > MAX_VERSION {
        out.push(Violation::new("version", format!("must not exceed {MAX_VERSION}")));
    }
    if let Some(cb) = &policy.circuit_breaker {
        check_circuit_breaker(cb, &mut out);
    }
    if let Some(retry) = &policy.retry {
        check_retry(retry, &mut out);
    }
    if let Some(rl) = &policy.rate_limit {
        check_rate_limit(rl, &mut out);
    }
    if let Some(bh) = &policy.bulkhead {
        check_bulkhead(bh, &mut out);
    }
    if let Some(t) = &policy.timeout {
        check_timeout(t, &mut out);
    }
    out
}

fn check_circuit_breaker(cb: &CircuitBreakerConfig, out: &mut Vec<Violation>) {
    if cb.failure_threshold < 1 {
        out.push(Violation::new("circuit_breaker.failure_threshold", "must be positive"));
    }
    if cb.success_threshold < 1 {
        out.push(Violation::new("circuit_breaker.success_threshold", "must be positive"));
    }
    check_duration("circuit_breaker.timeout_ms", cb.timeout_ms, out);
    if cb.probe_count < 1 {
        out.push(Violation::new("circuit_breaker.probe_count", "must be positive"));
    }
}

fn check_retry(retry: &RetryConfig, out: &mut Vec<Violation>) {
    if retry.max_attempts < 1 {
        out.push(Violation::new("retry.max_attempts", "must be at least 1"));
    }
    check_duration("retry.base_delay_ms", retry.base_delay_ms, out);
    if retry.max_delay_ms > MAX_DURATION_MS {
        out.push(Violation::new(
            "retry.max_delay_ms",
            format!("must not exceed {MAX_DURATION_MS}"),
        ));
    } else if retry.max_delay_ms < retry.base_delay_ms {
        out.push(Violation::new(
            "retry.max_delay_ms",
            "must be greater than or equal to base_delay_ms",
        ));
    }
    if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
        out.push(Violation::new("retry.multiplier", "must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&retry.jitter_percent) {
        out.push(Violation::new("retry.jitter_percent", "must be between 0 and 1"));
    }
    for code in &retry.retryable_errors {
        if code != OPERATION_FAILED && ErrorKind::from_code(code).is_none() {
            out.push(Violation::new(
                "retry.retryable_errors",
                format!("contains unknown error code '{code}'"),
            ));
        }
    }
}

fn check_rate_limit(rl: &RateLimitConfig, out: &mut Vec<Violation>) {
    if rl.algorithm.parse::<RateLimitAlgorithm>().is_err() {
        out.push(Violation::new(
            "rate_limit.algorithm",
            format!("'{}' is not a supported algorithm", rl.algorithm),
        ));
    }
    if rl.limit < 1 {
        out.push(Violation::new("rate_limit.limit", "must be positive"));
    }
    check_duration("rate_limit.window_ms", rl.window_ms, out);
    if rl.burst_size < 0 {
        out.push(Violation::new("rate_limit.burst_size", "must not be negative"));
    }
}

fn check_bulkhead(bh: &BulkheadConfig, out: &mut Vec<Violation>) {
    if bh.max_concurrent < 1 {
        out.push(Violation::new("bulkhead.max_concurrent", "must be positive"));
    }
    if bh.max_queue < 0 {
        out.push(Violation::new("bulkhead.max_queue", "must not be negative"));
    }
    check_duration("bulkhead.queue_timeout_ms", bh.queue_timeout_ms, out);
}

fn check_timeout(t: &TimeoutConfig, out: &mut Vec<Violation>) {
    if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&t.default_ms) {
        out.push(Violation::new(
            "timeout.default_ms",
            format!("must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS}"),
        ));
    }
    if let Some(max) = t.max_ms {
        if max > MAX_DURATION_MS {
            out.push(Violation::new(
                "timeout.max_ms",
                format!("must not exceed {MAX_DURATION_MS}"),
            ));
        } else if max < t.default_ms {
            out.push(Violation::new(
                "timeout.max_ms",
                "must be greater than or equal to default_ms",
            ));
        }
    }
}

fn check_duration(field: &str, ms: u64, out: &mut Vec<Violation>) {
    if ms == 0 {
        out.push(Violation::new(field, "must be positive"));
    } else if ms > MAX_DURATION_MS {
        out.push(Violation::new(field, format!("must not exceed {MAX_DURATION_MS}")));
    }
}
