//! Policy-driven guarded execution.
//!
//! For each call the executor resolves the named policy and runs the work
//! through, in order: the drain gate, the rate limiter, the bulkhead, then
//! the retry loop with the circuit breaker consulted before every attempt
//! and the policy timeout applied to each attempt. The caller's deadline
//! bounds the whole execution.
//!
//! Guards are built once per policy version and cached. A reload swaps in
//! a new runtime for later calls, while calls already running finish on the
//! runtime they started with. Components whose config did not change carry
//! over, so a breaker keeps its state across unrelated policy edits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::Instrument;

use crate::events::{EmitExt, EventBuilder, EventType};
use crate::lifecycle::shutdown::DrainCoordinator;
use crate::observability::metrics::{ExecutionOutcome, MetricsRecorder, NoopRecorder};
use crate::observability::tracing::RequestContext;
use crate::policy::engine::PolicyEngine;
use crate::policy::schema::Policy;
use crate::resilience::bulkhead::{BulkheadManager, BulkheadMetrics};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::resilience::error::{ResilienceError, ResilienceResult};
use crate::resilience::rate_limit::{build_rate_limiter, RateLimitHeaders, RateLimiter};
use crate::resilience::retries::RetryExecutor;
use crate::resilience::timeouts::{with_deadline, with_timeout};

/// Per-call inputs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub correlation_id: Option<String>,
    /// Absolute bound on the whole execution, queueing and retries included.
    pub deadline: Option<Instant>,
    /// Rate limit key; the policy name when absent.
    pub rate_limit_key: Option<String>,
    /// Bulkhead partition; the policy name when absent.
    pub partition_key: Option<String>,
    /// Requested per-attempt timeout, clamped by the policy's maximum.
    pub attempt_timeout: Option<Duration>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `budget` from now.
    pub fn with_budget(self, budget: Duration) -> Self {
        self.with_deadline(Instant::now() + budget)
    }

    pub fn with_rate_limit_key(mut self, key: impl Into<String>) -> Self {
        self.rate_limit_key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Guards built from one version of a policy.
#[derive(Debug)]
struct PolicyRuntime {
    policy: Arc<Policy>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<Arc<RetryExecutor>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    bulkheads: Option<Arc<BulkheadManager>>,
}

impl PolicyRuntime {
    fn build(
        policy: Arc<Policy>,
        previous: Option<&PolicyRuntime>,
        events: &Option<Arc<EventBuilder>>,
    ) -> ResilienceResult<Self> {
        let prev = previous.map(|p| p.policy.as_ref());

        let breaker = match &policy.circuit_breaker {
            Some(cfg) if prev.is_some_and(|p| p.circuit_breaker.as_ref() == Some(cfg)) => {
                previous.and_then(|p| p.breaker.clone())
            }
            Some(cfg) => Some(Arc::new(
                CircuitBreaker::new(&policy.name, cfg).with_events(events.clone()),
            )),
            None => None,
        };
        let retry = match &policy.retry {
            Some(cfg) if prev.is_some_and(|p| p.retry.as_ref() == Some(cfg)) => {
                previous.and_then(|p| p.retry.clone())
            }
            Some(cfg) => Some(Arc::new(
                RetryExecutor::new(&policy.name, cfg).with_events(events.clone()),
            )),
            None => None,
        };
        let limiter = match &policy.rate_limit {
            Some(cfg) if prev.is_some_and(|p| p.rate_limit.as_ref() == Some(cfg)) => {
                previous.and_then(|p| p.limiter.clone())
            }
            Some(cfg) => Some(build_rate_limiter(cfg).map_err(|e| match e {
                ResilienceError::InvalidPolicy { field, reason, .. } => {
                    ResilienceError::invalid_policy(&policy.name, field, reason)
                }
                other => other,
            })?),
            None => None,
        };
        let bulkheads = match &policy.bulkhead {
            Some(cfg) if prev.is_some_and(|p| p.bulkhead.as_ref() == Some(cfg)) => {
                previous.and_then(|p| p.bulkheads.clone())
            }
            Some(cfg) => Some(Arc::new(BulkheadManager::new(cfg).with_events(events.clone()))),
            None => None,
        };

        Ok(Self {
            policy,
            breaker,
            retry,
            limiter,
            bulkheads,
        })
    }
}

/// Runs work under named policies.
#[derive(Debug)]
pub struct ResilienceExecutor {
    engine: Arc<PolicyEngine>,
    runtimes: DashMap<String, Arc<PolicyRuntime>>,
    drain: Arc<DrainCoordinator>,
    metrics: Arc<dyn MetricsRecorder>,
    events: Option<Arc<EventBuilder>>,
}

impl ResilienceExecutor {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self {
            engine,
            runtimes: DashMap::new(),
            drain: Arc::new(DrainCoordinator::new()),
            metrics: Arc::new(NoopRecorder),
            events: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_events(mut self, events: Option<Arc<EventBuilder>>) -> Self {
        self.events = events;
        self
    }

    pub fn with_drain(mut self, drain: Arc<DrainCoordinator>) -> Self {
        self.drain = drain;
        self
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    pub fn drain_coordinator(&self) -> &Arc<DrainCoordinator> {
        &self.drain
    }

    /// Run `work` under `policy_name`. `work` receives the 1-based attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        policy_name: &str,
        ctx: ExecutionContext,
        work: F,
    ) -> ResilienceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let started = Instant::now();
        let correlation_id = ctx
            .correlation_id
            .clone()
            .or_else(RequestContext::current_correlation_id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut request = RequestContext::new(correlation_id.clone());
        if let Some(trace) = RequestContext::current_trace() {
            request = request.with_trace(trace);
        }

        let span = tracing::info_span!(
            "resilience.execute",
            policy = %policy_name,
            correlation_id = %correlation_id,
        );

        let result = request
            .scope(self.run(policy_name, &ctx, work).instrument(span))
            .await;

        let outcome = ExecutionOutcome::from_result(&result);
        self.metrics
            .record_execution(policy_name, outcome, started.elapsed());
        if let Err(err) = &result {
            self.observe_failure(policy_name, err);
        }
        result
    }

    async fn run<T, F, Fut>(
        &self,
        policy_name: &str,
        ctx: &ExecutionContext,
        mut work: F,
    ) -> ResilienceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let _in_flight = self.drain.begin()?;
        let runtime = self.resolve(policy_name)?;

        let guarded = async {
            if let Some(limiter) = &runtime.limiter {
                let key = ctx.rate_limit_key.as_deref().unwrap_or(policy_name);
                limiter.check(key)?;
            }

            let _permit = match &runtime.bulkheads {
                Some(manager) => {
                    let key = ctx.partition_key.as_deref().unwrap_or(policy_name);
                    Some(manager.partition(key).acquire_until(ctx.deadline).await?)
                }
                None => None,
            };

            let attempt_timeout = match &runtime.policy.timeout {
                Some(cfg) => Some(cfg.effective(ctx.attempt_timeout)),
                None => ctx.attempt_timeout,
            };
            let mut attempt_once = |attempt: u32| {
                let fut = work(attempt);
                async move {
                    match attempt_timeout {
                        Some(limit) => with_timeout(policy_name, limit, fut).await,
                        None => fut.await,
                    }
                }
            };

            let result = match (&runtime.retry, &runtime.breaker) {
                (Some(retry), breaker) => {
                    retry.execute_guarded(breaker.as_deref(), attempt_once).await
                }
                (None, Some(breaker)) => breaker.execute(|| attempt_once(1)).await,
                (None, None) => attempt_once(1).await,
            };

            if let Some(breaker) = &runtime.breaker {
                self.metrics
                    .record_circuit_state(breaker.name(), breaker.state());
            }
            result
        };

        with_deadline(policy_name, ctx.deadline, guarded).await
    }

    /// The runtime for the stored definition of `name`, rebuilt whenever
    /// the store holds a different definition than the cached runtime.
    fn resolve(&self, name: &str) -> ResilienceResult<Arc<PolicyRuntime>> {
        let snapshot = self.engine.snapshot();
        let Some(policy) = snapshot.get(name).cloned() else {
            self.runtimes.remove(name);
            return Err(ResilienceError::invalid_policy(name, "name", "not found"));
        };

        let cached = self.runtimes.get(name).map(|r| r.value().clone());
        if let Some(runtime) = &cached {
            if Arc::ptr_eq(&runtime.policy, &policy) {
                return Ok(runtime.clone());
            }
        }

        // Versions only grow across updates, so a lower or equal version
        // means the policy was deleted and created again: start fresh.
        let previous = cached
            .as_deref()
            .filter(|runtime| runtime.policy.version < policy.version);
        let version = policy.version;
        let runtime = Arc::new(PolicyRuntime::build(policy.clone(), previous, &self.events)?);
        tracing::debug!(
            policy = %name,
            version,
            carried_over = previous.is_some(),
            "Policy runtime built"
        );

        // Only cache a runtime for the definition still in the store. A
        // concurrent resolve for the same definition wins if it got there
        // first, so every caller shares one set of guards.
        let current = self
            .engine
            .snapshot()
            .get(name)
            .is_some_and(|stored| Arc::ptr_eq(stored, &policy));
        if !current {
            return Ok(runtime);
        }
        let installed = self
            .runtimes
            .entry(name.to_string())
            .and_modify(|existing| {
                if !Arc::ptr_eq(&existing.policy, &policy) {
                    *existing = runtime.clone();
                }
            })
            .or_insert_with(|| runtime.clone())
            .value()
            .clone();
        Ok(installed)
    }

    fn observe_failure(&self, policy_name: &str, err: &ResilienceError) {
        // Classify retry exhaustion by what the last attempt ran into.
        let cause = match err {
            ResilienceError::RetryExhausted { source, .. } => source.as_ref(),
            other => other,
        };
        match cause {
            ResilienceError::RateLimitExceeded {
                key,
                limit,
                retry_after,
                ..
            } => {
                self.metrics.record_rejection(policy_name, cause.code());
                self.events.record(
                    EventType::RateLimitHit,
                    crate::metadata!(
                        "policy" => policy_name,
                        "key" => key.as_str(),
                        "limit" => *limit,
                        "retry_after_ms" => retry_after.as_millis() as u64,
                    ),
                );
            }
            ResilienceError::CircuitOpen { .. } | ResilienceError::BulkheadFull { .. } => {
                self.metrics.record_rejection(policy_name, cause.code());
            }
            ResilienceError::Timeout { operation, timeout } => {
                self.events.record(
                    EventType::Timeout,
                    crate::metadata!(
                        "policy" => policy_name,
                        "operation" => operation.as_str(),
                        "timeout_ms" => timeout.as_millis() as u64,
                        "attempts" => err.attempts().unwrap_or(1),
                    ),
                );
            }
            _ => {}
        }
        tracing::debug!(policy = %policy_name, code = err.code(), error = %err, "Execution failed");
    }

    /// Breakers of every resolved policy still in the store, by name.
    pub fn circuits(&self) -> Vec<Arc<CircuitBreaker>> {
        let snapshot = self.engine.snapshot();
        let mut all: Vec<_> = self
            .runtimes
            .iter()
            .filter(|e| is_live(e.value(), snapshot.get(e.key())))
            .filter_map(|e| e.value().breaker.clone())
            .collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn circuit_states(&self) -> Vec<CircuitBreakerState> {
        self.circuits().iter().map(|cb| cb.snapshot()).collect()
    }

    /// Force the named policy's breaker closed.
    pub fn reset_circuit(&self, policy_name: &str) -> ResilienceResult<CircuitBreakerState> {
        let runtime = self.resolve(policy_name)?;
        let Some(breaker) = &runtime.breaker else {
            return Err(ResilienceError::invalid_policy(
                policy_name,
                "circuit_breaker",
                "is not configured",
            ));
        };
        breaker.reset();
        tracing::info!(policy = %policy_name, "Circuit reset");
        Ok(breaker.snapshot())
    }

    /// Partition metrics across every policy, ordered by policy then partition.
    pub fn bulkhead_metrics(&self) -> Vec<(String, BulkheadMetrics)> {
        let snapshot = self.engine.snapshot();
        let mut all: Vec<_> = self
            .runtimes
            .iter()
            .filter(|e| is_live(e.value(), snapshot.get(e.key())))
            .filter_map(|e| {
                let manager = e.value().bulkheads.clone()?;
                Some((e.key().clone(), manager))
            })
            .flat_map(|(policy, manager)| {
                manager
                    .metrics()
                    .into_iter()
                    .map(move |m| (policy.clone(), m))
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.partition.cmp(&b.1.partition)));
        all
    }

    /// Rate limit state for `key` under the named policy, if it limits.
    pub fn rate_limit_headers(
        &self,
        policy_name: &str,
        key: &str,
    ) -> ResilienceResult<Option<RateLimitHeaders>> {
        let runtime = self.resolve(policy_name)?;
        Ok(runtime.limiter.as_ref().map(|l| l.headers(key)))
    }
}

/// Whether a cached runtime still speaks for the stored definition, either
/// exactly or as the predecessor its guards carry over into.
fn is_live(runtime: &PolicyRuntime, stored: Option<&Arc<Policy>>) -> bool {
    stored.is_some_and(|policy| {
        Arc::ptr_eq(&runtime.policy, policy) || runtime.policy.version < policy.version
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::policy::schema::{
        BulkheadConfig, CircuitBreakerConfig, RateLimitConfig, RetryConfig, TimeoutConfig,
    };
    use crate::resilience::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor_with(policies: Vec<Policy>) -> ResilienceExecutor {
        let engine = Arc::new(PolicyEngine::new());
        engine.apply_all(policies).unwrap();
        ResilienceExecutor::new(engine)
    }

    fn fast_retry(max_attempts: i32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter_percent: 0.0,
            ..RetryConfig::default()
        }
    }

    fn flaky() -> ResilienceError {
        ResilienceError::unavailable("backend down")
    }

    #[tokio::test]
    async fn test_unknown_policy_is_invalid() {
        let executor = executor_with(vec![]);
        let err = executor
            .execute("missing", ExecutionContext::new(), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidPolicy { .. }));
    }

    #[tokio::test]
    async fn test_empty_policy_runs_work_once() {
        let executor = executor_with(vec![Policy::new("plain")]);
        let calls = AtomicU32::new(0);
        let out = executor
            .execute("plain", ExecutionContext::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(attempt) }
            })
            .await
            .unwrap();
        assert_eq!(out, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let executor = executor_with(vec![Policy::new("users").with_retry(fast_retry(3))]);
        let out = executor
            .execute("users", ExecutionContext::new(), |attempt| async move {
                if attempt < 3 {
                    Err(flaky())
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast_without_attempts() {
        let executor = executor_with(vec![Policy::new("users")
            .with_retry(fast_retry(5))
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::default()
            })]);

        let first = executor
            .execute("users", ExecutionContext::new(), |_| async {
                Err::<(), _>(flaky())
            })
            .await
            .unwrap_err();
        // Second attempt trips the breaker, third is refused.
        assert!(matches!(first, ResilienceError::CircuitOpen { .. }));
        assert_eq!(executor.circuit_states()[0].state, CircuitState::Open);

        let calls = AtomicU32::new(0);
        let err = executor
            .execute("users", ExecutionContext::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let executor = executor_with(vec![Policy::new("slow")
            .with_retry(fast_retry(2))
            .with_timeout(TimeoutConfig {
                default_ms: 100,
                max_ms: None,
            })]);

        let err = executor
            .execute("slow", ExecutionContext::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), Some(2));
        assert!(matches!(
            err,
            ResilienceError::RetryExhausted { ref source, .. }
                if matches!(**source, ResilienceError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempt_timeouts_emit_timeout_event() {
        let sink = Arc::new(MemorySink::default());
        let events = Arc::new(EventBuilder::new("svc").with_sink(sink.clone()));
        let engine = Arc::new(PolicyEngine::new());
        engine
            .update_policy(Policy::new("slow").with_retry(fast_retry(2)).with_timeout(
                TimeoutConfig {
                    default_ms: 100,
                    max_ms: None,
                },
            ))
            .unwrap();
        let executor = ResilienceExecutor::new(engine).with_events(Some(events));

        let err = executor
            .execute("slow", ExecutionContext::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::RetryExhausted { .. }));

        let timeouts: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| e.event_type == EventType::Timeout)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].metadata["attempts"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_whole_execution() {
        let executor = executor_with(vec![Policy::new("users").with_retry(RetryConfig {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter_percent: 0.0,
            ..RetryConfig::default()
        })]);

        let started = Instant::now();
        let err = executor
            .execute(
                "users",
                ExecutionContext::new().with_budget(Duration::from_millis(2_500)),
                |_| async { Err::<(), _>(flaky()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Timeout { .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(2_500));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_and_emits() {
        let sink = Arc::new(MemorySink::default());
        let events = Arc::new(EventBuilder::new("svc").with_sink(sink.clone()));
        let engine = Arc::new(PolicyEngine::new());
        engine
            .update_policy(Policy::new("api").with_rate_limit(RateLimitConfig {
                algorithm: "sliding_window".into(),
                limit: 2,
                window_ms: 60_000,
                burst_size: 0,
            }))
            .unwrap();
        let executor = ResilienceExecutor::new(engine).with_events(Some(events));

        for _ in 0..2 {
            executor
                .execute("api", ExecutionContext::new(), |_| async { Ok(()) })
                .await
                .unwrap();
        }
        let err = executor
            .execute("api", ExecutionContext::new(), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::RateLimitExceeded { limit: 2, .. }));
        assert!(err.retry_after().unwrap() > Duration::ZERO);

        // A different key has its own allowance.
        executor
            .execute(
                "api",
                ExecutionContext::new().with_rate_limit_key("tenant-b"),
                |_| async { Ok(()) },
            )
            .await
            .unwrap();

        let hits: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| e.event_type == EventType::RateLimitHit)
            .collect();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_bulkhead_partitions_are_independent() {
        let executor = Arc::new(executor_with(vec![Policy::new("uploads").with_bulkhead(
            BulkheadConfig {
                max_concurrent: 1,
                max_queue: 0,
                queue_timeout_ms: 1_000,
            },
        )]));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let holder = {
            let executor = executor.clone();
            tokio::spawn(async move {
                let mut signals = Some((started_tx, release_rx));
                executor
                    .execute(
                        "uploads",
                        ExecutionContext::new().with_partition("tenant-a"),
                        move |_| {
                            let (started, release) = signals.take().unwrap();
                            async move {
                                let _ = started.send(());
                                let _ = release.await;
                                Ok(())
                            }
                        },
                    )
                    .await
            })
        };
        started_rx.await.unwrap();

        let err = executor
            .execute(
                "uploads",
                ExecutionContext::new().with_partition("tenant-a"),
                |_| async { Ok(()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadFull { .. }));

        executor
            .execute(
                "uploads",
                ExecutionContext::new().with_partition("tenant-b"),
                |_| async { Ok(()) },
            )
            .await
            .unwrap();

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();

        let metrics = executor.bulkhead_metrics();
        let a = metrics.iter().find(|(_, m)| m.partition == "tenant-a").unwrap();
        assert_eq!(a.1.active, 0);
        assert_eq!(a.1.rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_keeps_breaker_state_when_breaker_unchanged() {
        let breaker = CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        };
        let executor = executor_with(vec![Policy::new("users").with_circuit_breaker(breaker.clone())]);
        let _ = executor
            .execute("users", ExecutionContext::new(), |_| async {
                Err::<(), _>(flaky())
            })
            .await;
        assert_eq!(executor.circuit_states()[0].state, CircuitState::Open);

        // Unrelated edit: breaker stays open.
        executor
            .engine()
            .update_policy(
                Policy::new("users")
                    .with_circuit_breaker(breaker)
                    .with_retry(fast_retry(2)),
            )
            .unwrap();
        let err = executor
            .execute("users", ExecutionContext::new(), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::CircuitOpen { .. }));

        // New breaker config: fresh breaker.
        executor
            .engine()
            .update_policy(Policy::new("users").with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 3,
                ..CircuitBreakerConfig::default()
            }))
            .unwrap();
        executor
            .execute("users", ExecutionContext::new(), |_| async { Ok(()) })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_circuit() {
        let executor = executor_with(vec![Policy::new("users").with_circuit_breaker(
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        )]);
        let _ = executor
            .execute("users", ExecutionContext::new(), |_| async {
                Err::<(), _>(flaky())
            })
            .await;

        let state = executor.reset_circuit("users").unwrap();
        assert_eq!(state.state, CircuitState::Closed);
        assert!(executor
            .execute("users", ExecutionContext::new(), |_| async { Ok(()) })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_deleted_policy_drops_runtime() {
        let executor = executor_with(vec![Policy::new("users")
            .with_circuit_breaker(CircuitBreakerConfig::default())]);
        executor
            .execute("users", ExecutionContext::new(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(executor.circuit_states().len(), 1);

        executor.engine().delete_policy("users").unwrap();
        assert!(executor.circuit_states().is_empty());
    }

    #[tokio::test]
    async fn test_recreated_policy_starts_with_fresh_guards() {
        let mut original = Policy::new("users").with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout_ms: 60_000,
            ..CircuitBreakerConfig::default()
        });
        original.version = 5;
        let executor = executor_with(vec![original]);
        let _ = executor
            .execute("users", ExecutionContext::new(), |_| async {
                Err::<(), _>(flaky())
            })
            .await;
        assert_eq!(executor.circuit_states()[0].state, CircuitState::Open);

        executor.engine().delete_policy("users").unwrap();
        executor
            .engine()
            .update_policy(Policy::new("users").with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 1,
                timeout_ms: 60_000,
                ..CircuitBreakerConfig::default()
            }))
            .unwrap();
        // The old open breaker is not reported for the new definition.
        assert!(executor.circuit_states().is_empty());

        executor
            .execute("users", ExecutionContext::new(), |_| async { Ok(()) })
            .await
            .unwrap();
        let states = executor.circuit_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_recreated_policy_without_breaker_runs() {
        let mut original = Policy::new("users").with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout_ms: 60_000,
            ..CircuitBreakerConfig::default()
        });
        original.version = 5;
        let executor = executor_with(vec![original]);
        let _ = executor
            .execute("users", ExecutionContext::new(), |_| async {
                Err::<(), _>(flaky())
            })
            .await;

        executor.engine().delete_policy("users").unwrap();
        executor.engine().update_policy(Policy::new("users")).unwrap();

        let out = executor
            .execute("users", ExecutionContext::new(), |_| async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert!(executor.circuit_states().is_empty());
    }

    #[tokio::test]
    async fn test_draining_refuses_new_executions() {
        let executor = executor_with(vec![Policy::new("users")]);
        executor
            .drain_coordinator()
            .drain(Duration::from_millis(10))
            .await
            .unwrap();
        let err = executor
            .execute("users", ExecutionContext::new(), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_correlation_id_reaches_events() {
        let sink = Arc::new(MemorySink::default());
        let events = Arc::new(
            EventBuilder::new("svc")
                .with_request_correlation()
                .with_sink(sink.clone()),
        );
        let engine = Arc::new(PolicyEngine::new());
        engine
            .update_policy(Policy::new("users").with_retry(RetryConfig {
                base_delay_ms: 1,
                max_delay_ms: 1,
                ..fast_retry(2)
            }))
            .unwrap();
        let executor = ResilienceExecutor::new(engine).with_events(Some(events));

        let _ = executor
            .execute(
                "users",
                ExecutionContext::new().with_correlation_id("req-42"),
                |attempt| async move {
                    if attempt == 1 {
                        Err(flaky())
                    } else {
                        Ok(())
                    }
                },
            )
            .await;

        let retries: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| e.event_type == EventType::RetryAttempt)
            .collect();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].correlation_id, "req-42");
    }
}
