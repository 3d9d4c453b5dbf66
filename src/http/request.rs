//! Request context propagation.
//!
//! Every request gets a correlation id (taken from `x-correlation-id` or
//! generated) and, when a valid `traceparent` header is present, a trace
//! context. Both are stored in the request extensions and in the task-local
//! [`RequestContext`] for the duration of the handler, and the correlation
//! id is echoed on the response.

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::observability::tracing::{RequestContext, TraceContext};

pub const X_CORRELATION_ID: &str = "x-correlation-id";
pub const TRACEPARENT: &str = "traceparent";

/// Longest correlation id accepted from a client.
const MAX_CORRELATION_ID_LEN: usize = 128;

pub async fn request_context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_CORRELATION_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut ctx = RequestContext::new(correlation_id.clone());
    if let Some(trace) = request
        .headers()
        .get(TRACEPARENT)
        .and_then(|v| v.to_str().ok())
        .and_then(TraceContext::from_traceparent)
    {
        ctx = ctx.with_trace(trace);
    }
    request.extensions_mut().insert(ctx.clone());

    tracing::debug!(
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
        "Admin request"
    );

    let mut response = ctx.scope(next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(X_CORRELATION_ID, value);
    }
    response
}
