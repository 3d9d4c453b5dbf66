//! Metrics collection and exposition.
//!
//! The engine reports through [`MetricsRecorder`] so hosts can pick an
//! exporter. [`PrometheusRecorder`] forwards to the `metrics` facade; the
//! scrape endpoint is installed separately with [`init_metrics`].
//!
//! # Metrics
//! - `resilience_executions_total` (counter): by policy, outcome, code
//! - `resilience_execution_duration_seconds` (histogram): by policy, outcome
//! - `resilience_rejections_total` (counter): guard rejections by policy, code
//! - `resilience_circuit_state` (gauge): 0=closed, 1=half-open, 2=open

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::error::ResilienceResult;

/// How one guarded execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure { code: &'static str },
}

impl ExecutionOutcome {
    pub fn from_result<T>(result: &ResilienceResult<T>) -> Self {
        match result {
            Ok(_) => ExecutionOutcome::Success,
            Err(e) => ExecutionOutcome::Failure { code: e.code() },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure { .. } => "failure",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "OK",
            ExecutionOutcome::Failure { code } => code,
        }
    }
}

/// Sink for execution metrics.
pub trait MetricsRecorder: Send + Sync + fmt::Debug {
    fn record_execution(&self, policy: &str, outcome: ExecutionOutcome, elapsed: Duration);

    /// A guard refused the call before the work ran.
    fn record_rejection(&self, policy: &str, code: &'static str);

    fn record_circuit_state(&self, _circuit: &str, _state: CircuitState) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record_execution(&self, _policy: &str, _outcome: ExecutionOutcome, _elapsed: Duration) {}

    fn record_rejection(&self, _policy: &str, _code: &'static str) {}
}

/// Forwards to the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusRecorder;

impl MetricsRecorder for PrometheusRecorder {
    fn record_execution(&self, policy: &str, outcome: ExecutionOutcome, elapsed: Duration) {
        metrics::counter!(
            "resilience_executions_total",
            "policy" => policy.to_string(),
            "outcome" => outcome.label(),
            "code" => outcome.code(),
        )
        .increment(1);
        metrics::histogram!(
            "resilience_execution_duration_seconds",
            "policy" => policy.to_string(),
            "outcome" => outcome.label(),
        )
        .record(elapsed.as_secs_f64());
    }

    fn record_rejection(&self, policy: &str, code: &'static str) {
        metrics::counter!(
            "resilience_rejections_total",
            "policy" => policy.to_string(),
            "code" => code,
        )
        .increment(1);
    }

    fn record_circuit_state(&self, circuit: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        metrics::gauge!("resilience_circuit_state", "circuit" => circuit.to_string()).set(value);
    }
}

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}
