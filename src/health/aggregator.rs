//! Health aggregation over pluggable checkers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::events::{EmitExt, EventBuilder, EventType, Metadata};

/// Ordered from best to worst, so the aggregate is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub details: Metadata,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
            details: Metadata::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Metadata) -> Self {
        self.details = details;
        self
    }
}

/// A component that can report its own health.
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self) -> ComponentHealth;
}

/// Unhealthy if any is, else degraded if any is, else healthy.
pub fn aggregate<I>(statuses: I) -> HealthStatus
where
    I: IntoIterator<Item = HealthStatus>,
{
    statuses.into_iter().max().unwrap_or(HealthStatus::Healthy)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

/// Runs every registered checker and tracks the aggregate.
pub struct HealthAggregator {
    checkers: Vec<Arc<dyn HealthChecker>>,
    last: Mutex<Option<HealthStatus>>,
    events: Option<Arc<EventBuilder>>,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
            last: Mutex::new(None),
            events: None,
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        self.checkers.push(checker);
        self
    }

    pub fn with_events(mut self, events: Option<Arc<EventBuilder>>) -> Self {
        self.events = events;
        self
    }

    /// Check everything now. A change of aggregate status emits a
    /// `health_change` event.
    pub fn check(&self) -> HealthReport {
        let components: Vec<ComponentHealth> = self.checkers.iter().map(|c| c.check()).collect();
        let status = aggregate(components.iter().map(|c| c.status));

        let previous = self.last.lock().replace(status);
        if let Some(previous) = previous.filter(|p| *p != status) {
            tracing::warn!(
                previous = previous.as_str(),
                current = status.as_str(),
                "Health status changed"
            );
            self.events.record(
                EventType::HealthChange,
                crate::metadata!(
                    "previous_status" => previous.as_str(),
                    "new_status" => status.as_str(),
                ),
            );
        }

        HealthReport {
            status,
            components,
            checked_at: Utc::now(),
        }
    }

    /// Last aggregate seen by [`check`](Self::check).
    pub fn last_status(&self) -> Option<HealthStatus> {
        *self.last.lock()
    }

    /// Check periodically until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Health monitor starting");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.checkers.iter().map(|c| c.name()).collect();
        f.debug_struct("HealthAggregator")
            .field("checkers", &names)
            .field("last", &self.last_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;

    struct Fixed {
        name: &'static str,
        status: Mutex<HealthStatus>,
    }

    impl Fixed {
        fn new(name: &'static str, status: HealthStatus) -> Arc<Self> {
            Arc::new(Self {
                name,
                status: Mutex::new(status),
            })
        }
    }

    impl HealthChecker for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn check(&self) -> ComponentHealth {
            ComponentHealth::new(self.name, *self.status.lock())
        }
    }

    #[test]
    fn test_aggregate_rules() {
        use HealthStatus::*;
        assert_eq!(aggregate([]), Healthy);
        assert_eq!(aggregate([Healthy, Healthy]), Healthy);
        assert_eq!(aggregate([Healthy, Degraded]), Degraded);
        assert_eq!(aggregate([Degraded, Unhealthy, Healthy]), Unhealthy);
    }

    #[test]
    fn test_no_checkers_is_healthy() {
        assert_eq!(HealthAggregator::new().check().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_status_change_emits_once() {
        let sink = Arc::new(MemorySink::default());
        let events = Arc::new(EventBuilder::new("svc").with_sink(sink.clone()));
        let db = Fixed::new("db", HealthStatus::Healthy);
        let aggregator = HealthAggregator::new()
            .with_checker(db.clone())
            .with_checker(Fixed::new("cache", HealthStatus::Healthy))
            .with_events(Some(events));

        assert_eq!(aggregator.check().status, HealthStatus::Healthy);
        *db.status.lock() = HealthStatus::Unhealthy;
        let report = aggregator.check();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.components.len(), 2);
        aggregator.check();

        let changes = sink.events();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].event_type, EventType::HealthChange);
        assert_eq!(changes[0].metadata["new_status"], "unhealthy");
    }

    #[test]
    fn test_report_serializes_lowercase() {
        let json = serde_json::to_value(ComponentHealth::new("db", HealthStatus::Degraded)).unwrap();
        assert_eq!(json["status"], "degraded");
        assert!(json.get("message").is_none());
    }
}
