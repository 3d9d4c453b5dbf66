//! Built-in checkers over the executor's guards.

use std::sync::Arc;

use crate::health::aggregator::{ComponentHealth, HealthChecker, HealthStatus};
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::executor::ResilienceExecutor;

/// Unhealthy while any breaker is open, degraded while any is probing.
#[derive(Debug)]
pub struct CircuitBreakerHealth {
    executor: Arc<ResilienceExecutor>,
}

impl CircuitBreakerHealth {
    pub fn new(executor: Arc<ResilienceExecutor>) -> Self {
        Self { executor }
    }
}

impl HealthChecker for CircuitBreakerHealth {
    fn name(&self) -> &str {
        "circuit_breakers"
    }

    fn check(&self) -> ComponentHealth {
        let states = self.executor.circuit_states();
        let open: Vec<&str> = states
            .iter()
            .filter(|s| s.state == CircuitState::Open)
            .map(|s| s.service_name.as_str())
            .collect();
        let half_open: Vec<&str> = states
            .iter()
            .filter(|s| s.state == CircuitState::HalfOpen)
            .map(|s| s.service_name.as_str())
            .collect();

        let details = crate::metadata!(
            "total" => states.len(),
            "open" => &open,
            "half_open" => &half_open,
        );
        let health = if !open.is_empty() {
            ComponentHealth::new(self.name(), HealthStatus::Unhealthy)
                .with_message(format!("open circuits: {}", open.join(", ")))
        } else if !half_open.is_empty() {
            ComponentHealth::new(self.name(), HealthStatus::Degraded)
                .with_message(format!("probing circuits: {}", half_open.join(", ")))
        } else {
            ComponentHealth::new(self.name(), HealthStatus::Healthy)
        };
        health.with_details(details)
    }
}

/// Degraded while any partition has every slot busy and callers queued.
#[derive(Debug)]
pub struct BulkheadHealth {
    executor: Arc<ResilienceExecutor>,
}

impl BulkheadHealth {
    pub fn new(executor: Arc<ResilienceExecutor>) -> Self {
        Self { executor }
    }
}

impl HealthChecker for BulkheadHealth {
    fn name(&self) -> &str {
        "bulkheads"
    }

    fn check(&self) -> ComponentHealth {
        let metrics = self.executor.bulkhead_metrics();
        let saturated: Vec<String> = metrics
            .iter()
            .filter(|(_, m)| m.active >= m.max_concurrent && m.queued > 0)
            .map(|(policy, m)| format!("{policy}/{}", m.partition))
            .collect();

        let details = crate::metadata!(
            "partitions" => metrics.len(),
            "saturated" => &saturated,
        );
        let health = if saturated.is_empty() {
            ComponentHealth::new(self.name(), HealthStatus::Healthy)
        } else {
            ComponentHealth::new(self.name(), HealthStatus::Degraded)
                .with_message(format!("saturated partitions: {}", saturated.join(", ")))
        };
        health.with_details(details)
    }
}
