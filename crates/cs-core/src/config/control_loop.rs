//! Control loop configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Configuration for a reconciliation control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlLoopConfig {
    /// Number of concurrent workers (0 falls back to 1)
    pub concurrency: usize,

    /// Backoff used for failed reconciles
    pub rate_limiter: RateLimiterConfig,

    /// Capacity of the condition sink channel
    pub condition_buffer: usize,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate_limiter: RateLimiterConfig::default(),
            condition_buffer: 100,
        }
    }
}

impl ControlLoopConfig {
    /// Worker count with the zero case folded to one
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limiter.validate()
    }
}

/// Exponential per-item backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Delay after the first failure
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each consecutive failure
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(5),
            max: Duration::from_secs(1000),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RateLimiterConfig {
    /// Reject backoff parameters that would shrink or overflow the delay
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "rate_limiter.multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "rate_limiter.jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        if self.initial > self.max {
            return Err(ConfigError::Invalid(
                "rate_limiter.initial must not exceed rate_limiter.max".to_string(),
            ));
        }
        Ok(())
    }
}
