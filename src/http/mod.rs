//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack, graceful shutdown)
//!     → request.rs (correlation id, traceparent → task-local context)
//!     → admin handlers
//!     → response.rs (ResilienceError → status, {code, message}, headers)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{request_context_middleware, TRACEPARENT, X_CORRELATION_ID};
pub use response::{ApiError, ErrorBody};
pub use server::HttpServer;
