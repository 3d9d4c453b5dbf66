//! Execution error taxonomy and its protocol status mapping.

use std::error::Error as StdError;
use std::time::Duration;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error produced by guarded work.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Code reported for failures of the guarded work itself.
pub const OPERATION_FAILED: &str = "OPERATION_FAILED";

/// Failure kinds the engine signals to its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    CircuitOpen,
    RateLimitExceeded,
    Timeout,
    BulkheadFull,
    RetryExhausted,
    InvalidPolicy,
    ServiceUnavailable,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::CircuitOpen,
        ErrorKind::RateLimitExceeded,
        ErrorKind::Timeout,
        ErrorKind::BulkheadFull,
        ErrorKind::RetryExhausted,
        ErrorKind::InvalidPolicy,
        ErrorKind::ServiceUnavailable,
    ];

    /// Stable wire code, also used in `RetryConfig::retryable_errors`.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::BulkheadFull => "BULKHEAD_FULL",
            ErrorKind::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorKind::InvalidPolicy => "INVALID_POLICY",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

/// Transport-neutral status consumed by protocol adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolStatus {
    Unavailable,
    ResourceExhausted,
    DeadlineExceeded,
    InvalidArgument,
    /// Failure of the guarded work itself, outside the taxonomy.
    Internal,
}

impl ProtocolStatus {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ProtocolStatus::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ProtocolStatus::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            ProtocolStatus::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ProtocolStatus::InvalidArgument => StatusCode::BAD_REQUEST,
            ProtocolStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors returned by guarded executions and policy management.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The breaker guarding `service` is open.
    #[error("circuit breaker '{service}' is open, retry after {retry_after:?}")]
    CircuitOpen { service: String, retry_after: Duration },

    /// The rate limiter rejected the call.
    #[error("rate limit of {limit} exceeded for '{key}', retry after {retry_after:?}")]
    RateLimitExceeded {
        key: String,
        limit: u32,
        remaining: u32,
        retry_after: Duration,
    },

    /// A deadline fired before the operation finished.
    #[error("operation '{operation}' timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// No slot and no queue capacity left, or the queue wait expired.
    #[error("bulkhead '{partition}' is full (max_concurrent={max_concurrent}, max_queue={max_queue})")]
    BulkheadFull {
        partition: String,
        max_concurrent: usize,
        max_queue: usize,
    },

    /// Every attempt failed; `source` is the last failure.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<ResilienceError>,
    },

    #[error("invalid policy '{policy}': {field} {reason}")]
    InvalidPolicy {
        policy: String,
        field: String,
        reason: String,
    },

    #[error("service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    /// The guarded work failed with its own error.
    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),
}

impl ResilienceError {
    pub fn operation(err: impl Into<BoxError>) -> Self {
        ResilienceError::Operation(err.into())
    }

    pub fn invalid_policy(
        policy: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ResilienceError::InvalidPolicy {
            policy: policy.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        ResilienceError::ServiceUnavailable {
            reason: reason.into(),
        }
    }

    /// Taxonomy kind; `None` for failures of the guarded work.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ResilienceError::CircuitOpen { .. } => Some(ErrorKind::CircuitOpen),
            ResilienceError::RateLimitExceeded { .. } => Some(ErrorKind::RateLimitExceeded),
            ResilienceError::Timeout { .. } => Some(ErrorKind::Timeout),
            ResilienceError::BulkheadFull { .. } => Some(ErrorKind::BulkheadFull),
            ResilienceError::RetryExhausted { .. } => Some(ErrorKind::RetryExhausted),
            ResilienceError::InvalidPolicy { .. } => Some(ErrorKind::InvalidPolicy),
            ResilienceError::ServiceUnavailable { .. } => Some(ErrorKind::ServiceUnavailable),
            ResilienceError::Operation(_) => None,
        }
    }

    /// Wire code; guarded-work failures report `OPERATION_FAILED`.
    pub fn code(&self) -> &'static str {
        self.kind().map(|k| k.code()).unwrap_or(OPERATION_FAILED)
    }

    /// Protocol status. Retry exhaustion reports the status of its last cause.
    pub fn status(&self) -> ProtocolStatus {
        match self {
            ResilienceError::CircuitOpen { .. } => ProtocolStatus::Unavailable,
            ResilienceError::RateLimitExceeded { .. } => ProtocolStatus::ResourceExhausted,
            ResilienceError::Timeout { .. } => ProtocolStatus::DeadlineExceeded,
            ResilienceError::BulkheadFull { .. } => ProtocolStatus::ResourceExhausted,
            ResilienceError::RetryExhausted { source, .. } => match source.as_ref() {
                ResilienceError::Operation(_) => ProtocolStatus::Unavailable,
                inner => inner.status(),
            },
            ResilienceError::InvalidPolicy { .. } => ProtocolStatus::InvalidArgument,
            ResilienceError::ServiceUnavailable { .. } => ProtocolStatus::Unavailable,
            ResilienceError::Operation(_) => ProtocolStatus::Internal,
        }
    }

    /// Hint for when the caller may try again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::CircuitOpen { retry_after, .. }
            | ResilienceError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            ResilienceError::RetryExhausted { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// Number of attempts made, for retry exhaustion.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ResilienceError::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Structured metadata for logs, events and error bodies.
    pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        use serde_json::json;

        let mut map = serde_json::Map::new();
        match self {
            ResilienceError::CircuitOpen { service, retry_after } => {
                map.insert("service".into(), json!(service));
                map.insert("retry_after_ms".into(), json!(retry_after.as_millis() as u64));
            }
            ResilienceError::RateLimitExceeded {
                key,
                limit,
                remaining,
                retry_after,
            } => {
                map.insert("key".into(), json!(key));
                map.insert("limit".into(), json!(limit));
                map.insert("remaining".into(), json!(remaining));
                map.insert("retry_after_ms".into(), json!(retry_after.as_millis() as u64));
            }
            ResilienceError::Timeout { operation, timeout } => {
                map.insert("operation".into(), json!(operation));
                map.insert("timeout_ms".into(), json!(timeout.as_millis() as u64));
            }
            ResilienceError::BulkheadFull {
                partition,
                max_concurrent,
                max_queue,
            } => {
                map.insert("partition".into(), json!(partition));
                map.insert("max_concurrent".into(), json!(max_concurrent));
                map.insert("max_queue".into(), json!(max_queue));
            }
            ResilienceError::RetryExhausted { attempts, source } => {
                map.insert("attempts".into(), json!(attempts));
                map.insert("last_error_code".into(), json!(source.code()));
            }
            ResilienceError::InvalidPolicy { policy, field, .. } => {
                map.insert("policy".into(), json!(policy));
                map.insert("field".into(), json!(field));
            }
            ResilienceError::ServiceUnavailable { .. } | ResilienceError::Operation(_) => {}
        }
        map
    }

    /// Walk the source chain looking for an error of type `E`.
    pub fn find_cause<E: StdError + 'static>(&self) -> Option<&E> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}
