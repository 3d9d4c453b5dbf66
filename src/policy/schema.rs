//! Policy definitions.
//!
//! A policy is a named bundle of optional guard configurations. Absent
//! sub-configs mean the guard is disabled for that policy. Durations are
//! stored as integer milliseconds so every serialization format agrees on
//! the representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A named resilience policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique, non-empty policy name.
    #[serde(default)]
    pub name: String,

    /// Assigned by the policy engine; monotonically increasing per name.
    #[serde(default)]
    pub version: u64,

    /// Services this policy applies to: exact name, `*`, or `prefix*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulkhead: Option<BulkheadConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutConfig>,
}

impl Policy {
    /// Create an empty policy with every guard disabled.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            service_pattern: None,
            circuit_breaker: None,
            retry: None,
            rate_limit: None,
            bulkhead: None,
            timeout: None,
        }
    }

    pub fn with_service_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.service_pattern = Some(pattern.into());
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    pub fn with_bulkhead(mut self, config: BulkheadConfig) -> Self {
        self.bulkhead = Some(config);
        self
    }

    pub fn with_timeout(mut self, config: TimeoutConfig) -> Self {
        self.timeout = Some(config);
        self
    }

    /// Whether this policy applies to `service`.
    pub fn matches_service(&self, service: &str) -> bool {
        match self.service_pattern.as_deref() {
            None => self.name == service,
            Some("*") => true,
            Some(pattern) => match pattern.strip_suffix('*') {
                Some(prefix) => service.starts_with(prefix),
                None => pattern == service,
            },
        }
    }

    /// Equal apart from the version stamp.
    pub fn same_content(&self, other: &Policy) -> bool {
        Policy {
            version: other.version,
            ..self.clone()
        } == *other
    }
}

/// A file or payload holding several policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: i32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: i32,

    /// Delay before an open circuit admits a probe.
    pub timeout_ms: u64,

    /// Concurrent probes admitted while half-open.
    pub probe_count: i32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            probe_count: 1,
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first call.
    pub max_attempts: i32,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,

    /// Backoff growth factor per attempt.
    pub multiplier: f64,

    /// Symmetric jitter as a fraction of the delay, in `[0, 1]`.
    pub jitter_percent: f64,

    /// Error codes eligible for retry. Empty means any eligible failure.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retryable_errors: Vec<String>,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1) as u32
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_percent: 0.1,
            retryable_errors: Vec::new(),
        }
    }
}

/// Rate limiting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// `token_bucket` or `sliding_window`.
    pub algorithm: String,

    /// Requests admitted per window.
    pub limit: i32,

    pub window_ms: u64,

    /// Token bucket capacity; 0 means `limit`.
    pub burst_size: i32,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            algorithm: "token_bucket".to_string(),
            limit: 100,
            window_ms: 1_000,
            burst_size: 10,
        }
    }
}

/// Bulkhead settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    pub max_concurrent: i32,

    /// Callers allowed to wait for a slot.
    pub max_queue: i32,

    pub queue_timeout_ms: u64,
}

impl BulkheadConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue: 100,
            queue_timeout_ms: 5_000,
        }
    }
}

/// Per-attempt deadline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_ms: u64,

    /// Upper bound for caller-requested timeouts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<u64>,
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_ms)
    }

    /// Resolve the deadline for one attempt.
    pub fn effective(&self, requested: Option<Duration>) -> Duration {
        let wanted = requested.unwrap_or_else(|| self.default_timeout());
        match self.max_ms {
            Some(max) => wanted.min(Duration::from_millis(max)),
            None => wanted,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: 30_000,
            max_ms: Some(60_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_pattern_matching() {
        let exact = Policy::new("users");
        assert!(exact.matches_service("users"));
        assert!(!exact.matches_service("users-v2"));

        let prefix = Policy::new("p").with_service_pattern("auth-*");
        assert!(prefix.matches_service("auth-edge"));
        assert!(!prefix.matches_service("token"));

        let any = Policy::new("p").with_service_pattern("*");
        assert!(any.matches_service("anything"));
    }

    #[test]
    fn test_effective_timeout_is_clamped() {
        let cfg = TimeoutConfig {
            default_ms: 1_000,
            max_ms: Some(5_000),
        };
        assert_eq!(cfg.effective(None), Duration::from_secs(1));
        assert_eq!(cfg.effective(Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(cfg.effective(Some(Duration::from_secs(30))), Duration::from_secs(5));
    }

    #[test]
    fn test_same_content_ignores_version() {
        let mut a = Policy::new("p").with_retry(RetryConfig::default());
        let b = a.clone();
        a.version = 9;
        assert!(a.same_content(&b));
        assert!(!a.same_content(&Policy::new("p")));
    }

    #[test]
    fn test_missing_sections_are_disabled() {
        let policy: Policy = serde_json::from_str(r#"{"name":"bare"}"#).unwrap();
        assert_eq!(policy, Policy::new("bare"));
    }
}
