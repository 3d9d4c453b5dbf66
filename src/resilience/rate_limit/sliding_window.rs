//! Sliding window limiter.
//!
//! Keeps one timestamp per admitted request, so the count is exact for the
//! trailing window rather than approximated by fixed buckets. A key whose
//! window has emptied is forgotten, and a sweep at most once per window
//! drops keys that stopped sending.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{RateLimitAlgorithm, RateLimitDecision, RateLimitHeaders, RateLimiter};

#[derive(Debug)]
struct Windows {
    by_key: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<Windows>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            windows: Mutex::new(Windows {
                by_key: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Admitted requests for `key` younger than the window.
    pub fn count(&self, key: &str) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let Some(stamps) = windows.by_key.get_mut(key) else {
            return 0;
        };
        self.prune(stamps, now);
        let len = stamps.len();
        if len == 0 {
            windows.by_key.remove(key);
        }
        len
    }

    /// Keys currently holding state.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().by_key.len()
    }

    fn sweep(&self, windows: &mut Windows, now: Instant) {
        if now.saturating_duration_since(windows.last_sweep) < self.window {
            return;
        }
        windows.by_key.retain(|_, stamps| {
            self.prune(stamps, now);
            !stamps.is_empty()
        });
        windows.last_sweep = now;
    }

    fn prune(&self, stamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = stamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the oldest timestamp leaves the window.
    fn until_oldest_expires(&self, stamps: &VecDeque<Instant>, now: Instant) -> Duration {
        stamps
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }

    fn until_empty(&self, stamps: &VecDeque<Instant>, now: Instant) -> Duration {
        stamps
            .back()
            .map(|newest| self.window.saturating_sub(now.saturating_duration_since(*newest)))
            .unwrap_or(Duration::ZERO)
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn allow(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        self.sweep(&mut windows, now);
        let stamps = windows.by_key.entry(key.to_string()).or_default();
        self.prune(stamps, now);

        let allowed = (stamps.len() as u32) < self.limit;
        if allowed {
            stamps.push_back(now);
        }
        let used = stamps.len() as u32;

        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(used),
            retry_after: if allowed {
                Duration::ZERO
            } else {
                self.until_oldest_expires(stamps, now)
            },
            reset_after: self.until_empty(stamps, now),
        }
    }

    fn headers(&self, key: &str) -> RateLimitHeaders {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let (used, reset_after) = match windows.by_key.get_mut(key) {
            Some(stamps) => {
                self.prune(stamps, now);
                (stamps.len() as u32, self.until_empty(stamps, now))
            }
            None => (0, Duration::ZERO),
        };
        if used == 0 {
            windows.by_key.remove(key);
        }
        RateLimitHeaders::from_parts(self.limit, self.limit.saturating_sub(used), reset_after)
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::SlidingWindow
    }
}
