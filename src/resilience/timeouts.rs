//! Deadline enforcement.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::resilience::error::{ResilienceError, ResilienceResult};

/// Run `fut`, failing with `Timeout` if it does not finish within `timeout`.
/// The future is dropped when the deadline fires.
pub async fn with_timeout<T, Fut>(
    operation: &str,
    timeout: Duration,
    fut: Fut,
) -> ResilienceResult<T>
where
    Fut: Future<Output = ResilienceResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ResilienceError::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
    }
}

/// Run `fut` until an absolute `deadline`, if any.
pub async fn with_deadline<T, Fut>(
    operation: &str,
    deadline: Option<Instant>,
    fut: Fut,
) -> ResilienceResult<T>
where
    Fut: Future<Output = ResilienceResult<T>>,
{
    let Some(deadline) = deadline else {
        return fut.await;
    };
    let budget = deadline.saturating_duration_since(Instant::now());
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ResilienceError::Timeout {
            operation: operation.to_string(),
            timeout: budget,
        }),
    }
}
