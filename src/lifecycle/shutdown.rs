//! Shutdown coordination.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};

use crate::resilience::error::{ResilienceError, ResilienceResult};

/// Broadcasts the stop signal to long-running tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks in-flight executions and stops admitting new ones on drain.
///
/// Draining never cancels work. It only waits, and reports what is still
/// outstanding when the wait runs out.
#[derive(Debug, Default)]
pub struct DrainCoordinator {
    draining: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl DrainCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of work, or refuse it once draining has started.
    pub fn begin(self: &Arc<Self>) -> ResilienceResult<InFlightGuard> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            coordinator: self.clone(),
        };
        if self.draining.load(Ordering::Acquire) {
            drop(guard);
            return Err(ResilienceError::unavailable("service is draining"));
        }
        Ok(guard)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Stop admission and wait up to `timeout` for outstanding work.
    pub async fn drain(&self, timeout: Duration) -> ResilienceResult<()> {
        self.draining.store(true, Ordering::Release);
        tracing::info!(in_flight = self.in_flight(), "Draining in-flight work");

        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => {
                tracing::info!("Drain complete");
                Ok(())
            }
            Err(_) => {
                let remaining = self.in_flight();
                tracing::warn!(remaining, "Drain timed out with work outstanding");
                Err(ResilienceError::Timeout {
                    operation: format!("drain ({remaining} in flight)"),
                    timeout,
                })
            }
        }
    }
}

/// Marks one in-flight execution; finishes it on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    coordinator: Arc<DrainCoordinator>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.coordinator.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.coordinator.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 1);
        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_guards() {
        let drain = Arc::new(DrainCoordinator::new());
        let guard = drain.begin().unwrap();
        assert_eq!(drain.in_flight(), 1);

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        drain.drain(Duration::from_secs(1)).await.unwrap();
        assert_eq!(drain.in_flight(), 0);
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn test_draining_rejects_new_work() {
        let drain = Arc::new(DrainCoordinator::new());
        drain.drain(Duration::from_millis(10)).await.unwrap();
        assert!(drain.is_draining());

        let err = drain.begin().unwrap_err();
        assert!(matches!(err, ResilienceError::ServiceUnavailable { .. }));
        assert_eq!(drain.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_reports_outstanding() {
        let drain = Arc::new(DrainCoordinator::new());
        let _a = drain.begin().unwrap();
        let _b = drain.begin().unwrap();

        let err = drain.drain(Duration::from_millis(100)).await.unwrap_err();
        match err {
            ResilienceError::Timeout { operation, timeout } => {
                assert!(operation.contains("2 in flight"));
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // Work is never cancelled.
        assert_eq!(drain.in_flight(), 2);
    }
}
