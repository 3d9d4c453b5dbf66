//! Request-scoped trace and correlation context.
//!
//! The context lives in a tokio task-local so that anything running inside
//! a scoped future (event builders, log spans) can read it without it being
//! threaded through every signature.

use std::future::Future;

tokio::task_local! {
    static REQUEST: RequestContext;
}

/// W3C trace identifiers for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    /// Parse a `traceparent` header (`00-<trace>-<span>-<flags>`).
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        let is_hex = |s: &str, len: usize| {
            s.len() == len && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        };
        if !is_hex(version, 2) || version == "ff" || !is_hex(flags, 2) {
            return None;
        }
        if !is_hex(trace_id, 32) || trace_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if !is_hex(span_id, 16) || span_id.bytes().all(|b| b == b'0') {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
        })
    }

    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }
}

/// Context attached to one inbound request or execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: String,
    pub trace: Option<TraceContext>,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Run `fut` with this context installed.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        REQUEST.scope(self, fut).await
    }

    /// The context of the current task, if one is installed.
    pub fn current() -> Option<RequestContext> {
        REQUEST.try_with(|ctx| ctx.clone()).ok()
    }

    pub fn current_correlation_id() -> Option<String> {
        REQUEST.try_with(|ctx| ctx.correlation_id.clone()).ok()
    }

    pub fn current_trace() -> Option<TraceContext> {
        REQUEST.try_with(|ctx| ctx.trace.clone()).ok().flatten()
    }
}
