//! Circuit breaker.
//!
//! # State Machine
//! ```text
//! CLOSED --(failure_threshold consecutive failures)--> OPEN
//! OPEN   --(first call after timeout, admitted as probe)--> HALF_OPEN
//! HALF_OPEN --(success_threshold successes)--> CLOSED
//! HALF_OPEN --(any failure)--> OPEN
//! ```
//!
//! All counters and the state live behind one per-instance lock, so
//! concurrent outcome recordings produce exactly one transition per
//! threshold crossing.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::events::{EmitExt, EventBuilder, EventType};
use crate::policy::schema::CircuitBreakerConfig;
use crate::resilience::error::{ResilienceError, ResilienceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of a breaker's runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_state_change: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Bumped on every transition.
    pub version: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitBreakerState,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
}

type Transition = (CircuitState, CircuitState);

/// Per-target three-state failure detector.
pub struct CircuitBreaker {
    service: String,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    probe_count: u32,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    events: Option<Arc<EventBuilder>>,
}

impl CircuitBreaker {
    /// Create a closed breaker. The config is expected to be validated.
    pub fn new(service_name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        let service = service_name.into();
        Self {
            service: service.clone(),
            failure_threshold: config.failure_threshold.max(1) as u32,
            success_threshold: config.success_threshold.max(1) as u32,
            timeout: config.timeout(),
            probe_count: config.probe_count.max(1) as u32,
            config: config.clone(),
            inner: Mutex::new(Inner {
                state: CircuitBreakerState {
                    service_name: service,
                    state: CircuitState::Closed,
                    failure_count: 0,
                    success_count: 0,
                    last_state_change: Utc::now(),
                    last_failure_time: None,
                    version: 0,
                },
                opened_at: None,
                probes_in_flight: 0,
            }),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<Arc<EventBuilder>>) -> Self {
        self.events = events;
        self
    }

    pub fn name(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state.state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.inner.lock().state.clone()
    }

    /// Ask to run one call. Fails fast while the circuit is open.
    pub fn acquire(&self) -> ResilienceResult<CircuitPermit<'_>> {
        let mut transition = None;
        let result = {
            let mut inner = self.inner.lock();
            let admitted = match inner.state.state {
                CircuitState::Closed => Ok(false),
                CircuitState::Open => {
                    let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(self.timeout);
                    if elapsed >= self.timeout {
                        transition = self.transition(&mut inner, CircuitState::HalfOpen);
                        inner.probes_in_flight = 1;
                        Ok(true)
                    } else {
                        Err(self.open_error(self.timeout - elapsed))
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probes_in_flight < self.probe_count {
                        inner.probes_in_flight += 1;
                        Ok(true)
                    } else {
                        Err(self.open_error(Duration::ZERO))
                    }
                }
            };
            admitted.map(|probe| (probe, inner.state.version))
        };
        self.announce(transition);

        let (probe, version) = result?;
        Ok(CircuitPermit {
            breaker: self,
            probe,
            version,
            settled: false,
        })
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state.state {
                CircuitState::Closed => {
                    inner.state.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                    inner.state.success_count += 1;
                    if inner.state.success_count >= self.success_threshold {
                        self.transition(&mut inner, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };
        self.announce(transition);
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.state.last_failure_time = Some(Utc::now());
            match inner.state.state {
                CircuitState::Closed => {
                    inner.state.failure_count += 1;
                    if inner.state.failure_count >= self.failure_threshold {
                        self.transition(&mut inner, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.state.failure_count += 1;
                    self.transition(&mut inner, CircuitState::Open)
                }
                CircuitState::Open => None,
            }
        };
        self.announce(transition);
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let t = self.transition(&mut inner, CircuitState::Closed);
            inner.state.failure_count = 0;
            inner.state.success_count = 0;
            t
        };
        self.announce(transition);
    }

    /// Run `work` behind the breaker, recording its outcome.
    pub async fn execute<T, F, Fut>(&self, work: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let permit = self.acquire()?;
        let result = work().await;
        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        result
    }

    fn open_error(&self, retry_after: Duration) -> ResilienceError {
        ResilienceError::CircuitOpen {
            service: self.service.clone(),
            retry_after,
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) -> Option<Transition> {
        let from = inner.state.state;
        if from == to {
            return None;
        }

        inner.state.state = to;
        inner.state.last_state_change = Utc::now();
        inner.state.version += 1;
        inner.probes_in_flight = 0;
        match to {
            CircuitState::Closed => {
                inner.state.failure_count = 0;
                inner.state.success_count = 0;
                inner.opened_at = None;
            }
            CircuitState::Open => {
                inner.state.success_count = 0;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                inner.state.success_count = 0;
            }
        }
        Some((from, to))
    }

    fn announce(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        let service = &self.service;
        if to == CircuitState::Open {
            tracing::warn!(service = %service, from = %from, to = %to, "Circuit opened");
        } else {
            tracing::info!(service = %service, from = %from, to = %to, "Circuit state changed");
        }
        self.events.record(
            EventType::CircuitStateChange,
            crate::metadata!(
                "circuit" => service.as_str(),
                "previous_state" => from.as_str(),
                "new_state" => to.as_str(),
            ),
        );
    }

    fn release_probe(&self, version: u64) {
        let mut inner = self.inner.lock();
        if inner.state.version == version && inner.state.state == CircuitState::HalfOpen {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

/// Admission for one call. Settle it with `success` or `failure`;
/// dropping it unsettled frees a half-open probe slot without recording.
#[must_use = "an unsettled permit records nothing"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    version: u64,
    settled: bool,
}

impl CircuitPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(self.version);
        }
    }
}
