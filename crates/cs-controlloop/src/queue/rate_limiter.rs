//! Per-key retry delays for failed reconciles

use std::time::Duration;

use dashmap::DashMap;

use cs_core::config::RateLimiterConfig;
use cs_core::ObjectKey;

/// Decides how long a key waits before it is retried
pub trait RateLimiter: Send + Sync {
    /// Delay for the next retry of `key`; counts as one more failure
    fn when(&self, key: &ObjectKey) -> Duration;

    /// Clear the failure history of `key`
    fn forget(&self, key: &ObjectKey);

    /// Number of failures recorded for `key` since it was last forgotten
    fn num_requeues(&self, key: &ObjectKey) -> u32;
}

/// Exponential backoff tracked separately for every key
///
/// The n-th consecutive failure of a key waits `initial * multiplier^n`,
/// capped at `max`, plus up to `jitter` of that delay at random. A
/// multiplier below 1.0 is raised to 1.0 and a non-finite jitter counts as
/// none, so delays never shrink between failures.
pub struct ExponentialFailureRateLimiter {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    failures: DashMap<ObjectKey, u32>,
}

impl ExponentialFailureRateLimiter {
    /// Create a rate limiter from configuration
    pub fn from_config(config: &RateLimiterConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a rate limiter with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max,
            multiplier: if multiplier >= 1.0 { multiplier } else { 1.0 },
            jitter: if jitter.is_finite() {
                jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
            failures: DashMap::new(),
        }
    }

    fn backoff(&self, exponent: u32) -> Duration {
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max)
    }
}

impl Default for ExponentialFailureRateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimiterConfig::default())
    }
}

impl RateLimiter for ExponentialFailureRateLimiter {
    fn when(&self, key: &ObjectKey) -> Duration {
        let exponent = {
            let mut failures = self.failures.entry(key.clone()).or_insert(0);
            let current = *failures;
            *failures = current.saturating_add(1);
            current
        };

        let delay = self.backoff(exponent);
        if self.jitter == 0.0 {
            return delay;
        }

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay.saturating_add(Duration::try_from_secs_f64(jitter_amount).unwrap_or_default())
    }

    fn forget(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }
}

/// Uses the longest delay proposed by any of its limiters
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &ObjectKey) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &ObjectKey) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_increases() {
        let limiter = ExponentialFailureRateLimiter::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
            0.0,
        );
        let key = ObjectKey::new("r1");

        assert_eq!(limiter.when(&key), Duration::from_secs(1));
        assert_eq!(limiter.when(&key), Duration::from_secs(2));
        assert_eq!(limiter.when(&key), Duration::from_secs(4));
        assert_eq!(limiter.num_requeues(&key), 3);
    }

    #[test]
    fn test_backoff_max() {
        let limiter = ExponentialFailureRateLimiter::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
            2.0,
            0.0,
        );
        let key = ObjectKey::new("r1");

        assert_eq!(limiter.when(&key), Duration::from_secs(30));
        assert_eq!(limiter.when(&key), Duration::from_secs(60));
        assert_eq!(limiter.when(&key), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_saturates_for_huge_exponents() {
        let limiter = ExponentialFailureRateLimiter::default();
        let key = ObjectKey::new("r1");
        limiter.failures.insert(key.clone(), u32::MAX);

        assert_eq!(limiter.when(&key), Duration::from_secs(1000));
        assert_eq!(limiter.num_requeues(&key), u32::MAX);
    }

    #[test]
    fn test_bad_parameters_never_shrink_or_panic() {
        let key = ObjectKey::new("r1");

        let negative = ExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(10),
            -2.0,
            0.0,
        );
        assert_eq!(negative.when(&key), Duration::from_millis(5));
        assert_eq!(negative.when(&key), Duration::from_millis(5));
        assert_eq!(negative.when(&key), Duration::from_millis(5));

        let shrinking = ExponentialFailureRateLimiter::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            0.5,
            0.0,
        );
        let first = shrinking.when(&key);
        assert!(shrinking.when(&key) >= first);

        let nan = ExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(10),
            f64::NAN,
            f64::NAN,
        );
        assert_eq!(nan.when(&key), Duration::from_millis(5));
        assert_eq!(nan.when(&key), Duration::from_millis(5));
    }

    #[test]
    fn test_keys_back_off_independently() {
        let limiter = ExponentialFailureRateLimiter::new(
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
            0.0,
        );
        let a = ObjectKey::new("a");
        let b = ObjectKey::new("b");

        limiter.when(&a);
        limiter.when(&a);
        assert_eq!(limiter.when(&b), Duration::from_millis(10));
        assert_eq!(limiter.num_requeues(&a), 2);
    }

    #[test]
    fn test_forget_resets() {
        let limiter = ExponentialFailureRateLimiter::new(
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
            0.0,
        );
        let key = ObjectKey::new("r1");

        limiter.when(&key);
        limiter.when(&key);
        limiter.forget(&key);

        assert_eq!(limiter.num_requeues(&key), 0);
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let limiter = ExponentialFailureRateLimiter::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
            0.5,
        );
        let key = ObjectKey::new("r1");

        let delay = limiter.when(&key);
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1500));
    }

    #[test]
    fn test_max_of_picks_longest() {
        let fast = ExponentialFailureRateLimiter::new(
            Duration::from_millis(1),
            Duration::from_secs(1),
            2.0,
            0.0,
        );
        let slow = ExponentialFailureRateLimiter::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            0.0,
        );
        let limiter = MaxOfRateLimiter::new(vec![Box::new(fast), Box::new(slow)]);
        let key = ObjectKey::new("r1");

        assert_eq!(limiter.when(&key), Duration::from_millis(100));
        assert_eq!(limiter.when(&key), Duration::from_millis(200));
        assert_eq!(limiter.num_requeues(&key), 2);

        limiter.forget(&key);
        assert_eq!(limiter.num_requeues(&key), 0);
    }
}
