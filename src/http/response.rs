//! Error responses.
//!
//! Every failure is rendered as `{code, message}` JSON, with the status
//! taken from the error's protocol status. Rate-limit rejections also carry
//! the `X-RateLimit-*` and `Retry-After` headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::events::Metadata;
use crate::resilience::error::ResilienceError;
use crate::resilience::rate_limit::RateLimitHeaders;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// An HTTP-facing error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    headers: HeaderMap,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                metadata: Metadata::new(),
            },
            headers: HeaderMap::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "missing or invalid bearer token")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ErrorBody {
        &self.body
    }
}

impl From<ResilienceError> for ApiError {
    fn from(err: ResilienceError) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(retry_after) = err.retry_after() {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if let ResilienceError::RateLimitExceeded {
            limit,
            remaining,
            retry_after,
            ..
        } = &err
        {
            let projected = RateLimitHeaders::from_parts(*limit, *remaining, *retry_after);
            for (name, value) in projected.to_pairs() {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(HeaderName::from_static(name), value);
                }
            }
        }

        Self {
            status: err.status().http_status(),
            body: ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
                metadata: err.metadata(),
            },
            headers,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.body.code, message = %self.body.message, "Request failed");
        }
        (self.status, self.headers, Json(self.body)).into_response()
    }
}

impl IntoResponse for ResilienceError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_limit_projection() {
        let err = ApiError::from(ResilienceError::RateLimitExceeded {
            key: "tenant-a".into(),
            limit: 5,
            remaining: 0,
            retry_after: Duration::from_millis(11_500),
        });
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body().code, "RATE_LIMIT_EXCEEDED");
        assert_eq!(err.headers["retry-after"], "12");
        assert_eq!(err.headers["x-ratelimit-limit"], "5");
        assert_eq!(err.headers["x-ratelimit-remaining"], "0");
        assert!(err.headers.contains_key("x-ratelimit-reset"));
    }

    #[test]
    fn test_taxonomy_statuses() {
        let cases = [
            (ResilienceError::unavailable("down"), StatusCode::SERVICE_UNAVAILABLE),
            (
                ResilienceError::invalid_policy("p", "name", "must not be empty"),
                StatusCode::BAD_REQUEST,
            ),
            (
                ResilienceError::Timeout {
                    operation: "op".into(),
                    timeout: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_into_response_status() {
        let response = ResilienceError::BulkheadFull {
            partition: "db".into(),
            max_concurrent: 1,
            max_queue: 0,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
