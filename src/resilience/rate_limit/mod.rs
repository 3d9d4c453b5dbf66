//! Rate limiting.
//!
//! # Data Flow
//! ```text
//! RateLimitConfig
//!     → build_rate_limiter (resolve algorithm name)
//!     → token_bucket.rs | sliding_window.rs
//!     → allow(key) → RateLimitDecision { allowed, remaining, retry_after }
//!     → headers(key) → RateLimitHeaders { limit, remaining, reset }
//! ```
//!
//! # Design Decisions
//! - Limiters never block; rejection carries a retry-after hint
//! - State is per key behind one lock per limiter instance
//! - Time comes from `tokio::time::Instant` so tests can pause the clock

pub mod sliding_window;
pub mod token_bucket;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::policy::schema::RateLimitConfig;
use crate::resilience::error::{ResilienceError, ResilienceResult};

pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Supported admission algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAlgorithm {
    TokenBucket,
    SlidingWindow,
}

impl RateLimitAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAlgorithm::TokenBucket => "token_bucket",
            RateLimitAlgorithm::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for RateLimitAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an algorithm name no limiter implements.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rate limit algorithm '{0}'")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for RateLimitAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token_bucket" => Ok(RateLimitAlgorithm::TokenBucket),
            "sliding_window" => Ok(RateLimitAlgorithm::SlidingWindow),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Zero when allowed.
    pub retry_after: Duration,
    /// Time until the key is fully replenished.
    pub reset_after: Duration,
}

/// Header projection of a key's limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the key is fully replenished.
    pub reset: u64,
}

impl RateLimitHeaders {
    pub fn from_parts(limit: u32, remaining: u32, reset_after: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let reset_at = now + reset_after;
        let reset = reset_at.as_secs() + u64::from(reset_at.subsec_nanos() > 0);
        Self {
            limit,
            remaining,
            reset,
        }
    }

    /// `X-RateLimit-*` name/value pairs.
    pub fn to_pairs(&self) -> [(&'static str, String); 3] {
        [
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset.to_string()),
        ]
    }
}

/// Admission control keyed by caller-chosen strings.
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Check and, if admitted, consume one unit for `key`.
    fn allow(&self, key: &str) -> RateLimitDecision;

    /// Current state of `key` without consuming anything.
    fn headers(&self, key: &str) -> RateLimitHeaders;

    fn algorithm(&self) -> RateLimitAlgorithm;

    /// [`allow`](Self::allow) as a result.
    fn check(&self, key: &str) -> ResilienceResult<RateLimitDecision> {
        let decision = self.allow(key);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(ResilienceError::RateLimitExceeded {
                key: key.to_string(),
                limit: decision.limit,
                remaining: decision.remaining,
                retry_after: decision.retry_after,
            })
        }
    }
}

/// Build the limiter named by `config.algorithm`.
pub fn build_rate_limiter(config: &RateLimitConfig) -> ResilienceResult<Arc<dyn RateLimiter>> {
    let algorithm: RateLimitAlgorithm = config.algorithm.parse().map_err(|e: UnknownAlgorithm| {
        ResilienceError::invalid_policy("", "rate_limit.algorithm", e.to_string())
    })?;
    let limit = config.limit.max(1) as u32;
    let window = config.window();
    if window.is_zero() {
        return Err(ResilienceError::invalid_policy(
            "",
            "rate_limit.window_ms",
            "must be positive",
        ));
    }

    let limiter: Arc<dyn RateLimiter> = match algorithm {
        RateLimitAlgorithm::TokenBucket => {
            let capacity = if config.burst_size > 0 {
                config.burst_size as u32
            } else {
                limit
            };
            Arc::new(TokenBucketLimiter::new(capacity, limit, window))
        }
        RateLimitAlgorithm::SlidingWindow => Arc::new(SlidingWindowLimiter::new(limit, window)),
    };
    Ok(limiter)
}
