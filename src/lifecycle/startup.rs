//! Startup orchestration.
//!
//! Builds every subsystem from a validated [`ServiceConfig`] in dependency
//! order: events, policy store, executor, health, then the policy file.
//! Any failure is fatal to startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use notify::RecommendedWatcher;

use crate::admin::AdminState;
use crate::config::schema::ServiceConfig;
use crate::events::{EventBuilder, TracingEventSink};
use crate::health::{BulkheadHealth, CircuitBreakerHealth, HealthAggregator};
use crate::lifecycle::shutdown::{DrainCoordinator, Shutdown};
use crate::observability::metrics::{MetricsRecorder, NoopRecorder, PrometheusRecorder};
use crate::policy::engine::PolicyEngine;
use crate::policy::source::{PolicyFileSource, SourceError};
use crate::resilience::executor::ResilienceExecutor;

/// Everything the host process runs.
pub struct Services {
    pub config: ServiceConfig,
    pub events: Option<Arc<EventBuilder>>,
    pub engine: Arc<PolicyEngine>,
    pub executor: Arc<ResilienceExecutor>,
    pub health: Arc<HealthAggregator>,
    pub drain: Arc<DrainCoordinator>,
    pub shutdown: Shutdown,
    /// Keeps the policy file watcher alive.
    policy_watcher: Option<RecommendedWatcher>,
}

impl Services {
    pub fn build(config: ServiceConfig) -> Result<Self, SourceError> {
        let events = config.events.enabled.then(|| {
            Arc::new(
                EventBuilder::new(config.service_name.clone())
                    .with_request_correlation()
                    .with_sink(Arc::new(TracingEventSink)),
            )
        });

        let engine = Arc::new(PolicyEngine::new().with_events(events.clone()));
        let drain = Arc::new(DrainCoordinator::new());
        let metrics: Arc<dyn MetricsRecorder> = if config.observability.metrics_enabled {
            Arc::new(PrometheusRecorder)
        } else {
            Arc::new(NoopRecorder)
        };
        let executor = Arc::new(
            ResilienceExecutor::new(engine.clone())
                .with_events(events.clone())
                .with_metrics(metrics)
                .with_drain(drain.clone()),
        );

        let health = Arc::new(
            HealthAggregator::new()
                .with_checker(Arc::new(CircuitBreakerHealth::new(executor.clone())))
                .with_checker(Arc::new(BulkheadHealth::new(executor.clone())))
                .with_events(events.clone()),
        );

        let policy_watcher = match &config.policies.path {
            Some(path) => {
                let base = config
                    .policies
                    .base_dir
                    .clone()
                    .unwrap_or_else(|| parent_dir(path));
                let source = Arc::new(PolicyFileSource::open(path, &base, engine.clone())?);
                source.load()?;
                if config.policies.watch {
                    Some(source.watch()?)
                } else {
                    None
                }
            }
            None => {
                tracing::warn!("No policy file configured, starting with an empty store");
                None
            }
        };

        tracing::info!(
            service_name = %config.service_name,
            policies = engine.len(),
            watching = policy_watcher.is_some(),
            "Services initialized"
        );

        Ok(Self {
            config,
            events,
            engine,
            executor,
            health,
            drain,
            shutdown: Shutdown::new(),
            policy_watcher,
        })
    }

    pub fn is_watching_policies(&self) -> bool {
        self.policy_watcher.is_some()
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            executor: self.executor.clone(),
            health: self.health.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
            service_name: Arc::from(self.config.service_name.as_str()),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
            started_at: Utc::now(),
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
