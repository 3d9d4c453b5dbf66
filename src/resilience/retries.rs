//! Bounded retry with exponential backoff.
//!
//! The executor suspends only at the inter-attempt sleep. Dropping the
//! returned future cancels the sleep; callers that need a deadline wrap the
//! execution in `tokio::time::timeout` (the resilience executor does).

use std::future::Future;
use std::sync::Arc;

use crate::events::{EmitExt, EventBuilder, EventType};
use crate::policy::schema::RetryConfig;
use crate::resilience::backoff::Backoff;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::error::{ResilienceError, ResilienceResult};

/// Runs work up to `max_attempts` times.
#[derive(Debug)]
pub struct RetryExecutor {
    name: String,
    config: RetryConfig,
    backoff: Backoff,
    events: Option<Arc<EventBuilder>>,
}

impl RetryExecutor {
    pub fn new(name: impl Into<String>, config: &RetryConfig) -> Self {
        Self {
            name: name.into(),
            config: config.clone(),
            backoff: Backoff::new(config.clone()),
            events: None,
        }
    }

    /// Use a fixed seed for jitter.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.backoff = Backoff::with_seed(self.config.clone(), seed);
        self
    }

    pub fn with_events(mut self, events: Option<Arc<EventBuilder>>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether a failure may be retried under this config.
    ///
    /// Open circuits and invalid policies never are. With an explicit
    /// `retryable_errors` list, only listed codes are.
    pub fn is_retryable(&self, err: &ResilienceError) -> bool {
        match err {
            ResilienceError::CircuitOpen { .. } | ResilienceError::InvalidPolicy { .. } => false,
            _ if self.config.retryable_errors.is_empty() => true,
            _ => self.config.retryable_errors.iter().any(|c| c == err.code()),
        }
    }

    /// Run `work`, retrying eligible failures. `work` receives the 1-based attempt.
    pub async fn execute<T, F, Fut>(&self, work: F) -> ResilienceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        self.execute_guarded(None, work).await
    }

    /// Like [`execute`](Self::execute), consulting `breaker` before each attempt.
    /// An open breaker ends the loop immediately with its circuit-open error.
    pub async fn execute_guarded<T, F, Fut>(
        &self,
        breaker: Option<&CircuitBreaker>,
        mut work: F,
    ) -> ResilienceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let max_attempts = self.config.attempts();
        let mut attempt = 0u32;

        loop {
            let permit = match breaker {
                Some(cb) => Some(cb.acquire()?),
                None => None,
            };

            attempt += 1;
            let result = work(attempt).await;

            if let Some(permit) = permit {
                match &result {
                    Ok(_) => permit.success(),
                    Err(_) => permit.failure(),
                }
            }

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    target_name = %self.name,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(ResilienceError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.backoff.delay(attempt - 1);
            tracing::debug!(
                target_name = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            self.events.record(
                EventType::RetryAttempt,
                crate::metadata!(
                    "target" => self.name.as_str(),
                    "attempt" => attempt,
                    "max_attempts" => max_attempts,
                    "delay_ms" => delay.as_millis() as u64,
                    "error_code" => err.code(),
                ),
            );
            tokio::time::sleep(delay).await;
        }
    }
}
