//! Bulkhead isolation.
//!
//! A partition caps concurrent work with a semaphore and lets a bounded
//! number of callers wait for a slot. Active and queued counts are held in
//! RAII guards so they stay exact even when a waiting future is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use crate::events::{EmitExt, EventBuilder, EventType};
use crate::policy::schema::BulkheadConfig;
use crate::resilience::error::{ResilienceError, ResilienceResult};

/// Point-in-time counters for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkheadMetrics {
    pub partition: String,
    pub active: usize,
    pub queued: usize,
    pub rejected: u64,
    pub max_concurrent: usize,
    pub max_queue: usize,
}

/// One partition: `max_concurrent` slots and `max_queue` waiters.
pub struct Bulkhead {
    partition: String,
    max_concurrent: usize,
    max_queue: usize,
    queue_timeout: Duration,
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    queued: AtomicUsize,
    rejected: AtomicU64,
    events: Option<Arc<EventBuilder>>,
}

impl Bulkhead {
    pub fn new(partition: impl Into<String>, config: &BulkheadConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1) as usize;
        Self {
            partition: partition.into(),
            max_concurrent,
            max_queue: config.max_queue.max(0) as usize,
            queue_timeout: config.queue_timeout(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<Arc<EventBuilder>>) -> Self {
        self.events = events;
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            partition: self.partition.clone(),
            active: self.active_count(),
            queued: self.queued_count(),
            rejected: self.rejected_count(),
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
        }
    }

    /// Take a slot, waiting up to the queue timeout if none is free.
    pub async fn acquire(self: &Arc<Self>) -> ResilienceResult<BulkheadPermit> {
        self.acquire_until(None).await
    }

    /// Like [`acquire`](Self::acquire), giving up with `Timeout` at `deadline`
    /// if that comes before the queue timeout.
    pub async fn acquire_until(
        self: &Arc<Self>,
        deadline: Option<Instant>,
    ) -> ResilienceResult<BulkheadPermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(self.admit(permit)),
            Err(TryAcquireError::NoPermits) => {}
            Err(TryAcquireError::Closed) => {
                return Err(ResilienceError::unavailable("bulkhead closed"));
            }
        }

        let Some(slot) = self.reserve_queue_slot() else {
            return Err(self.reject("full"));
        };

        let queue_deadline = Instant::now() + self.queue_timeout;
        let (wait_until, caller_bound) = match deadline {
            Some(d) if d < queue_deadline => (d, true),
            _ => (queue_deadline, false),
        };

        let acquired =
            tokio::time::timeout_at(wait_until, self.semaphore.clone().acquire_owned()).await;
        drop(slot);

        match acquired {
            Ok(Ok(permit)) => Ok(self.admit(permit)),
            Ok(Err(_)) => Err(ResilienceError::unavailable("bulkhead closed")),
            Err(_) if caller_bound => Err(ResilienceError::Timeout {
                operation: format!("bulkhead '{}' acquire", self.partition),
                timeout: self.queue_timeout,
            }),
            Err(_) => Err(self.reject("queue_timeout")),
        }
    }

    fn admit(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        self.active.fetch_add(1, Ordering::AcqRel);
        BulkheadPermit {
            bulkhead: self.clone(),
            _permit: permit,
        }
    }

    fn reserve_queue_slot(self: &Arc<Self>) -> Option<QueueSlot> {
        let mut prev = self.queued.load(Ordering::Acquire);
        loop {
            if prev >= self.max_queue {
                return None;
            }
            match self.queued.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(QueueSlot {
            bulkhead: self.clone(),
        })
    }

    fn reject(&self, reason: &'static str) -> ResilienceError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            partition = %self.partition,
            reason,
            active = self.active_count(),
            queued = self.queued_count(),
            "Bulkhead rejected call"
        );
        self.events.record(
            EventType::BulkheadRejection,
            crate::metadata!(
                "partition" => self.partition.as_str(),
                "reason" => reason,
                "max_concurrent" => self.max_concurrent,
                "max_queue" => self.max_queue,
            ),
        );
        ResilienceError::BulkheadFull {
            partition: self.partition.clone(),
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
        }
    }
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("partition", &self.partition)
            .field("active", &self.active_count())
            .field("queued", &self.queued_count())
            .field("max_concurrent", &self.max_concurrent)
            .field("max_queue", &self.max_queue)
            .finish()
    }
}

/// A held bulkhead slot; released on drop.
#[derive(Debug)]
pub struct BulkheadPermit {
    bulkhead: Arc<Bulkhead>,
    // Dropped after `Drop::drop` runs, so `active` falls before the slot frees.
    _permit: OwnedSemaphorePermit,
}

impl BulkheadPermit {
    pub fn partition(&self) -> &str {
        &self.bulkhead.partition
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.bulkhead.active.fetch_sub(1, Ordering::AcqRel);
    }
}

struct QueueSlot {
    bulkhead: Arc<Bulkhead>,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.bulkhead.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Partitions kept before unreferenced ones are dropped.
pub const MAX_PARTITIONS: usize = 1_024;

/// Lazily creates one bulkhead per partition key. Past [`MAX_PARTITIONS`],
/// partitions nobody holds a permit, queue slot or handle for are dropped
/// and rebuilt on next use.
#[derive(Debug)]
pub struct BulkheadManager {
    config: BulkheadConfig,
    partitions: DashMap<String, Arc<Bulkhead>>,
    events: Option<Arc<EventBuilder>>,
}

impl BulkheadManager {
    pub fn new(config: &BulkheadConfig) -> Self {
        Self {
            config: config.clone(),
            partitions: DashMap::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<Arc<EventBuilder>>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// The bulkhead for `key`, created on first use.
    pub fn partition(&self, key: &str) -> Arc<Bulkhead> {
        if let Some(existing) = self.partitions.get(key) {
            return existing.value().clone();
        }
        let bulkhead = self
            .partitions
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Bulkhead::new(key, &self.config).with_events(self.events.clone()))
            })
            .value()
            .clone();
        if self.partitions.len() > MAX_PARTITIONS {
            self.prune_idle();
        }
        bulkhead
    }

    /// Drop partitions only the manager references. Returns how many went.
    pub fn prune_idle(&self) -> usize {
        let before = self.partitions.len();
        self.partitions
            .retain(|_, bulkhead| Arc::strong_count(bulkhead) > 1);
        let removed = before.saturating_sub(self.partitions.len());
        if removed > 0 {
            tracing::debug!(removed, "Idle bulkhead partitions dropped");
        }
        removed
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub async fn acquire(&self, key: &str) -> ResilienceResult<BulkheadPermit> {
        self.partition(key).acquire().await
    }

    pub fn metrics(&self) -> Vec<BulkheadMetrics> {
        let mut all: Vec<_> = self.partitions.iter().map(|e| e.value().metrics()).collect();
        all.sort_by(|a, b| a.partition.cmp(&b.partition));
        all
    }

    pub fn total_active(&self) -> usize {
        self.partitions.iter().map(|e| e.value().active_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn config(max_concurrent: i32, max_queue: i32, queue_timeout_ms: u64) -> BulkheadConfig {
        BulkheadConfig {
            max_concurrent,
            max_queue,
            queue_timeout_ms,
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let bh = Arc::new(Bulkhead::new("db", &config(2, 0, 100)));
        let p1 = bh.acquire().await.unwrap();
        let p2 = bh.acquire().await.unwrap();
        assert_eq!(bh.active_count(), 2);

        let err = bh.acquire().await.unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadFull { .. }));
        assert_eq!(bh.rejected_count(), 1);

        drop(p1);
        assert_eq!(bh.active_count(), 1);
        let _p3 = bh.acquire().await.unwrap();
        drop(p2);
        assert_eq!(bh.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_caller_gets_released_slot() {
        let bh = Arc::new(Bulkhead::new("db", &config(1, 1, 1_000)));
        let held = bh.acquire().await.unwrap();

        let waiter = {
            let bh = bh.clone();
            tokio::spawn(async move { bh.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert_eq!(bh.queued_count(), 1);

        // Queue is full now.
        assert!(bh.acquire().await.is_err());

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(bh.queued_count(), 0);
        assert_eq!(bh.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_timeout_rejects() {
        let bh = Arc::new(Bulkhead::new("db", &config(1, 5, 200)));
        let _held = bh.acquire().await.unwrap();

        let started = Instant::now();
        let err = bh.acquire().await.unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadFull { .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(200));
        assert_eq!(bh.queued_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_surfaces_timeout() {
        let bh = Arc::new(Bulkhead::new("db", &config(1, 5, 10_000)));
        let _held = bh.acquire().await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = bh.acquire_until(Some(deadline)).await.unwrap_err();
        assert!(matches!(err, ResilienceError::Timeout { .. }));
        assert_eq!(bh.queued_count(), 0);
        assert_eq!(bh.rejected_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_frees_queue_slot() {
        let bh = Arc::new(Bulkhead::new("db", &config(1, 1, 10_000)));
        let _held = bh.acquire().await.unwrap();

        let waiter = {
            let bh = bh.clone();
            tokio::spawn(async move { bh.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert_eq!(bh.queued_count(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(bh.queued_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_invariants_under_burst() {
        let bh = Arc::new(Bulkhead::new("db", &config(3, 4, 2_000)));
        let violated = Arc::new(AtomicBool::new(false));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let bh = bh.clone();
                let violated = violated.clone();
                tokio::spawn(async move {
                    if let Ok(permit) = bh.acquire().await {
                        if bh.active_count() > 3 || bh.queued_count() > 4 {
                            violated.store(true, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        drop(permit);
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        assert!(!violated.load(Ordering::SeqCst));
        assert_eq!(bh.active_count(), 0);
        assert_eq!(bh.queued_count(), 0);
        let m = bh.metrics();
        assert_eq!(m.active, 0);
        assert!(m.rejected <= 64);
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let manager = BulkheadManager::new(&config(1, 0, 100));
        let _a = manager.acquire("tenant-a").await.unwrap();
        assert!(manager.acquire("tenant-a").await.is_err());
        assert!(manager.acquire("tenant-b").await.is_ok());

        assert!(Arc::ptr_eq(
            &manager.partition("tenant-a"),
            &manager.partition("tenant-a")
        ));
        let metrics = manager.metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].partition, "tenant-a");
        assert_eq!(metrics[0].rejected, 1);
        assert_eq!(manager.total_active(), 1);
    }

    #[tokio::test]
    async fn test_unreferenced_partitions_are_pruned_past_the_cap() {
        let manager = BulkheadManager::new(&config(1, 0, 100));
        let held = manager.acquire("tenant-held").await.unwrap();
        for i in 0..MAX_PARTITIONS * 2 {
            manager.acquire(&format!("tenant-{i}")).await.unwrap();
        }
        assert!(manager.partition_count() <= MAX_PARTITIONS + 1);

        // The busy partition survives with its state intact.
        assert_eq!(held.partition(), "tenant-held");
        assert!(manager.acquire("tenant-held").await.is_err());
        assert_eq!(manager.partition("tenant-held").active_count(), 1);

        drop(held);
        manager.prune_idle();
        assert_eq!(manager.partition_count(), 0);
    }
}
