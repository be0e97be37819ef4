//! Retry policy with exponential backoff

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff retry applied around pool borrows and remote executes.
///
/// Only errors classified transient by `EngineError::is_transient` are
/// retried; validation and auth failures surface immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Ceiling on any single delay.
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Multiplier applied per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Add jitter to delays.
    #[serde(default)]
    pub jitter: bool,

    /// Jitter factor (0.0 to 1.0).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: false,
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Base delay after the given failed attempt (1-based):
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt as i32 - 1);
        let delay = Duration::from_secs_f64(self.initial_backoff.as_secs_f64() * exp);
        delay.min(self.max_backoff)
    }

    /// Delay to sleep after the given failed attempt, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff_for(attempt);
        if !self.jitter {
            return base;
        }
        let mut rng = rand::rng();
        let range = base.as_secs_f64() * self.jitter_factor;
        let jitter = rng.random_range(-range / 2.0..=range / 2.0);
        Duration::from_secs_f64((base.as_secs_f64() + jitter).max(0.0))
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.3
}
