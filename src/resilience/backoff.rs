//! Exponential backoff with symmetric jitter.

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::policy::schema::RetryConfig;

/// Un-jittered delay for 0-indexed `attempt`: `min(base * multiplier^attempt, max)`.
pub fn capped_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay_ms as f64;
    let max = config.max_delay_ms as f64;
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let delay = (base * config.multiplier.powi(exponent)).min(max);
    millis_to_duration(delay)
}

/// Apply jitter to `delay`. `unit` is a sample from `[0, 1)`; the result lies in
/// `[delay * (1 - jitter), delay * (1 + jitter)]`, clamped to `[0, max]`.
pub fn apply_jitter(delay: Duration, jitter: f64, max: Duration, unit: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    let factor = 1.0 - jitter + 2.0 * jitter * unit.clamp(0.0, 1.0);
    let nanos = (delay.as_nanos() as f64 * factor).clamp(0.0, max.as_nanos() as f64);
    Duration::from_nanos(nanos.round() as u64)
}

fn millis_to_duration(millis: f64) -> Duration {
    if millis.is_finite() && millis > 0.0 {
        Duration::from_nanos((millis * 1_000_000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

/// Delay calculator with its own random source.
#[derive(Debug)]
pub struct Backoff {
    config: RetryConfig,
    rng: Mutex<StdRng>,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic delays for a given seed.
    pub fn with_seed(config: RetryConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Delay to wait after the 0-indexed `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = capped_delay(&self.config, attempt);
        if self.config.jitter_percent <= 0.0 {
            return capped;
        }
        let unit: f64 = self.rng.lock().gen();
        apply_jitter(
            capped,
            self.config.jitter_percent,
            self.config.max_delay(),
            unit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(base: u64, max: u64, multiplier: f64, jitter: f64) -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            base_delay_ms: base,
            max_delay_ms: max,
            multiplier,
            jitter_percent: jitter,
            retryable_errors: Vec::new(),
        }
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let cfg = config(100, 1_000, 2.0, 0.0);
        assert_eq!(capped_delay(&cfg, 0), Duration::from_millis(100));
        assert_eq!(capped_delay(&cfg, 1), Duration::from_millis(200));
        assert_eq!(capped_delay(&cfg, 3), Duration::from_millis(800));
        assert_eq!(capped_delay(&cfg, 4), Duration::from_millis(1_000));
        assert_eq!(capped_delay(&cfg, 500), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_extremes() {
        let d = Duration::from_millis(1_000);
        let max = Duration::from_millis(10_000);
        assert_eq!(apply_jitter(d, 0.2, max, 0.0), Duration::from_millis(800));
        assert_eq!(apply_jitter(d, 0.2, max, 1.0), Duration::from_millis(1_200));
        // Upper half is clamped to the cap.
        assert_eq!(apply_jitter(d, 0.5, d, 1.0), d);
    }

    #[test]
    fn test_seeded_delays_are_reproducible() {
        let cfg = config(100, 10_000, 2.0, 0.3);
        let a = Backoff::with_seed(cfg.clone(), 42);
        let b = Backoff::with_seed(cfg, 42);
        let left: Vec<_> = (0..8).map(|n| a.delay(n)).collect();
        let right: Vec<_> = (0..8).map(|n| b.delay(n)).collect();
        assert_eq!(left, right);
    }

    proptest! {
        #[test]
        fn prop_delay_within_jitter_bounds(
            attempt in 0u32..64,
            base in 1u64..5_000,
            extra in 0u64..60_000,
            multiplier in 1.0f64..4.0,
            jitter in 0.0f64..=1.0,
            seed in any::<u64>(),
        ) {
            let cfg = config(base, base + extra, multiplier, jitter);
            let d = capped_delay(&cfg, attempt).as_nanos() as f64;
            let delay = Backoff::with_seed(cfg.clone(), seed).delay(attempt);
            let nanos = delay.as_nanos() as f64;

            prop_assert!(delay <= cfg.max_delay());
            prop_assert!(nanos >= (d * (1.0 - jitter)).floor() - 1.0);
            prop_assert!(nanos <= (d * (1.0 + jitter)).ceil() + 1.0);
        }
    }
}
