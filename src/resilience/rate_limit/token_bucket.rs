//! Token bucket limiter.
//!
//! A bucket that has refilled to capacity is indistinguishable from a new
//! one, so full buckets are dropped on a sweep run at most once per full
//! refill period.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{RateLimitAlgorithm, RateLimitDecision, RateLimitHeaders, RateLimiter};

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn refill(&mut self, now: Instant, capacity: f64, refill_per_sec: f64) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).clamp(0.0, capacity);
        self.last_update = now;
    }
}

#[derive(Debug)]
struct Buckets {
    by_key: HashMap<String, TokenBucket>,
    last_sweep: Instant,
}

/// Pre-allocated credit: `capacity` tokens refilled at `refill` per `window`.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<Buckets>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u32, refill: u32, window: Duration) -> Self {
        let window_secs = window.as_secs_f64().max(f64::MIN_POSITIVE);
        Self {
            capacity: f64::from(capacity.max(1)),
            refill_per_sec: f64::from(refill.max(1)) / window_secs,
            buckets: Mutex::new(Buckets {
                by_key: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Current token count for `key` after refill.
    pub fn tokens(&self, key: &str) -> f64 {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.by_key.get_mut(key) else {
            return self.capacity;
        };
        bucket.refill(now, self.capacity, self.refill_per_sec);
        let tokens = bucket.tokens;
        if tokens >= self.capacity {
            buckets.by_key.remove(key);
        }
        tokens
    }

    /// Keys currently holding a partially drained bucket.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().by_key.len()
    }

    fn sweep(&self, buckets: &mut Buckets, now: Instant) {
        if now.saturating_duration_since(buckets.last_sweep) < self.seconds_for(self.capacity) {
            return;
        }
        buckets.by_key.retain(|_, bucket| {
            bucket.refill(now, self.capacity, self.refill_per_sec);
            bucket.tokens < self.capacity
        });
        buckets.last_sweep = now;
    }

    fn seconds_for(&self, tokens: f64) -> Duration {
        Duration::from_secs_f64((tokens / self.refill_per_sec).max(0.0))
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        self.sweep(&mut buckets, now);
        let bucket = buckets
            .by_key
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity, now));
        bucket.refill(now, self.capacity, self.refill_per_sec);

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        let tokens = bucket.tokens;

        RateLimitDecision {
            allowed,
            limit: self.capacity(),
            remaining: tokens.floor() as u32,
            retry_after: if allowed {
                Duration::ZERO
            } else {
                self.seconds_for(1.0 - tokens)
            },
            reset_after: self.seconds_for(self.capacity - tokens),
        }
    }

    fn headers(&self, key: &str) -> RateLimitHeaders {
        let tokens = self.tokens(key);
        RateLimitHeaders::from_parts(
            self.capacity(),
            tokens.floor() as u32,
            self.seconds_for(self.capacity - tokens),
        )
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::TokenBucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_capacity_then_reject() {
        let limiter = TokenBucketLimiter::new(5, 5, Duration::from_secs(60));
        for i in 0..5 {
            let d = limiter.allow("k");
            assert!(d.allowed, "call {i} should pass");
            assert_eq!(d.remaining, 4 - i);
        }
        let rejected = limiter.allow("k");
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.retry_after > Duration::ZERO);
        assert_eq!(rejected.retry_after, Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let limiter = TokenBucketLimiter::new(3, 3, Duration::from_secs(3));
        for _ in 0..3 {
            assert!(limiter.allow("k").allowed);
        }
        assert!(limiter.tokens("k") < 1.0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!((limiter.tokens("k") - 1.0).abs() < 1e-9);

        tokio::time::advance(Duration::from_secs(3_600)).await;
        assert_eq!(limiter.tokens("k"), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consuming_decrements_by_one() {
        let limiter = TokenBucketLimiter::new(10, 1, Duration::from_secs(1));
        let before = limiter.tokens("k");
        limiter.allow("k");
        let after = limiter.tokens("k");
        assert!((before - after - 1.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = TokenBucketLimiter::new(1, 1, Duration::from_secs(10));
        assert!(limiter.allow("a").allowed);
        assert!(!limiter.allow("a").allowed);
        assert!(limiter.allow("b").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_headers_do_not_consume() {
        let limiter = TokenBucketLimiter::new(4, 4, Duration::from_secs(1));
        limiter.allow("k");
        let h1 = limiter.headers("k");
        let h2 = limiter.headers("k");
        assert_eq!(h1.remaining, 3);
        assert_eq!(h2.remaining, 3);
        assert_eq!(h1.limit, 4);
    }

    #[test]
    fn test_tokens_stay_in_bounds_under_contention() {
        let limiter = std::sync::Arc::new(TokenBucketLimiter::new(50, 50, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.allow("k").allowed).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let tokens = limiter.tokens("k");

        assert!((0.0..=50.0).contains(&tokens));
        assert!((50..=51).contains(&admitted), "admitted {admitted}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refilled_buckets_are_dropped() {
        let limiter = TokenBucketLimiter::new(2, 2, Duration::from_secs(1));
        limiter.allow("a");
        limiter.allow("b");
        assert_eq!(limiter.tracked_keys(), 2);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow("c").allowed);
        assert_eq!(limiter.tracked_keys(), 1);

        // Reading a refilled bucket forgets it too.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.tokens("c"), 2.0);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_a_full_bucket_keeps_decisions() {
        let limiter = TokenBucketLimiter::new(1, 1, Duration::from_secs(1));
        assert!(limiter.allow("k").allowed);
        assert!(!limiter.allow("k").allowed);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow("k").allowed);
        assert!(!limiter.allow("k").allowed);
    }
}
