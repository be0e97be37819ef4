//! Per-target circuit breaker
//!
//! Tracks a sliding window of call outcomes per connection target. When the
//! failure or slow-call rate over the window crosses its threshold (with a
//! minimum sample size), the breaker opens and callers fail fast without a
//! network attempt. After a wait it half-opens, admits a bounded number of
//! trial calls, and commits back to closed or open. ForcedOpen and Disabled
//! are manual operator overrides.

use crate::error::{EngineError, EngineResult};
use crate::remote::target::TargetKey;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of recent calls considered for the rates.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Samples required before the breaker may open.
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: usize,

    /// Failure rate (0.0 to 1.0) that opens the breaker.
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Slow-call rate (0.0 to 1.0) that opens the breaker.
    #[serde(default = "default_slow_call_rate_threshold")]
    pub slow_call_rate_threshold: f64,

    /// Duration at which a successful call counts as slow.
    #[serde(default = "default_slow_call_threshold", with = "humantime_serde")]
    pub slow_call_threshold: Duration,

    /// How long the breaker stays open before probing recovery.
    #[serde(default = "default_wait_duration", with = "humantime_serde")]
    pub wait_duration: Duration,

    /// Trial calls admitted while half-open.
    #[serde(default = "default_permitted_half_open_calls")]
    pub permitted_half_open_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            minimum_calls: default_minimum_calls(),
            failure_rate_threshold: default_failure_rate_threshold(),
            slow_call_rate_threshold: default_slow_call_rate_threshold(),
            slow_call_threshold: default_slow_call_threshold(),
            wait_duration: default_wait_duration(),
            permitted_half_open_calls: default_permitted_half_open_calls(),
        }
    }
}

fn default_window_size() -> usize {
    10
}

fn default_minimum_calls() -> usize {
    5
}

fn default_failure_rate_threshold() -> f64 {
    0.5
}

fn default_slow_call_rate_threshold() -> f64 {
    1.0
}

fn default_slow_call_threshold() -> Duration {
    Duration::from_secs(10)
}

fn default_wait_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_permitted_half_open_calls() -> usize {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen { remaining: usize, successes: usize },
    ForcedOpen,
    Disabled,
}

struct BreakerInner {
    state: CircuitState,
    window: VecDeque<CallOutcome>,
}

/// Breaker for one target. Shared by every caller hitting that target.
pub struct CircuitBreaker {
    key: TargetKey,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(key: TargetKey, config: CircuitBreakerConfig) -> Self {
        Self {
            key,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
            }),
        }
    }

    /// Gate one call attempt. An open breaker fails fast; an elapsed wait
    /// flips it to half-open and admits the call as a trial.
    pub fn try_acquire(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::Disabled => Ok(()),
            CircuitState::ForcedOpen => Err(self.open_error()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.wait_duration {
                    debug!(target = %self.key, "circuit half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen {
                        remaining: self.config.permitted_half_open_calls.saturating_sub(1),
                        successes: 0,
                    };
                    Ok(())
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen {
                remaining,
                successes,
            } => {
                if remaining == 0 {
                    Err(self.open_error())
                } else {
                    inner.state = CircuitState::HalfOpen {
                        remaining: remaining - 1,
                        successes,
                    };
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call and its duration (for slow-call accounting).
    pub fn record_success(&self, duration: Duration) {
        let outcome = if duration >= self.config.slow_call_threshold {
            CallOutcome::Slow
        } else {
            CallOutcome::Success
        };
        self.record(outcome);
    }

    pub fn record_failure(&self) {
        self.record(CallOutcome::Failure);
    }

    fn record(&self, outcome: CallOutcome) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Disabled | CircuitState::ForcedOpen => {}
            CircuitState::Closed => {
                inner.window.push_back(outcome);
                while inner.window.len() > self.config.window_size {
                    inner.window.pop_front();
                }
                if self.should_open(&inner.window) {
                    warn!(target = %self.key, "circuit opened");
                    inner.state = CircuitState::Open {
                        since: Instant::now(),
                    };
                }
            }
            CircuitState::HalfOpen {
                remaining,
                successes,
            } => match outcome {
                CallOutcome::Failure | CallOutcome::Slow => {
                    warn!(target = %self.key, "trial call failed, circuit re-opened");
                    inner.state = CircuitState::Open {
                        since: Instant::now(),
                    };
                }
                CallOutcome::Success => {
                    let successes = successes + 1;
                    if successes >= self.config.permitted_half_open_calls {
                        debug!(target = %self.key, "trial calls succeeded, circuit closed");
                        inner.window.clear();
                        inner.state = CircuitState::Closed;
                    } else {
                        inner.state = CircuitState::HalfOpen {
                            remaining,
                            successes,
                        };
                    }
                }
            },
            // Outcomes observed while open (in-flight calls finishing late)
            // do not change the open decision.
            CircuitState::Open { .. } => {}
        }
    }

    fn should_open(&self, window: &VecDeque<CallOutcome>) -> bool {
        if window.len() < self.config.minimum_calls {
            return false;
        }
        let total = window.len() as f64;
        let failures = window
            .iter()
            .filter(|o| matches!(o, CallOutcome::Failure))
            .count() as f64;
        let slow = window
            .iter()
            .filter(|o| matches!(o, CallOutcome::Slow))
            .count() as f64;

        failures / total >= self.config.failure_rate_threshold
            || slow / total >= self.config.slow_call_rate_threshold
    }

    /// Manual override: reject every call until `reset`.
    pub fn force_open(&self) {
        self.inner.lock().unwrap().state = CircuitState::ForcedOpen;
    }

    /// Manual override: admit every call and stop recording until `reset`.
    pub fn disable(&self) {
        self.inner.lock().unwrap().state = CircuitState::Disabled;
    }

    /// Return to closed with a fresh window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.window.clear();
        inner.state = CircuitState::Closed;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    fn open_error(&self) -> EngineError {
        EngineError::CircuitOpen {
            target: self.key.to_string(),
        }
    }
}

/// Owns one breaker per target key. Constructed by the orchestrator and
/// passed by handle; there is no process-global registry.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<TargetKey, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The shared breaker for a target, created on first use.
    pub fn breaker_for(&self, key: &TargetKey) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        Arc::clone(breakers.entry(key.clone()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(key.clone(), self.config.clone()))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TargetKey {
        TargetKey {
            username: "root".into(),
            host: "db01".into(),
            port: 22,
        }
    }

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 10,
            minimum_calls: 3,
            failure_rate_threshold: 0.5,
            slow_call_rate_threshold: 1.0,
            slow_call_threshold: Duration::from_secs(10),
            wait_duration: Duration::from_millis(50),
            permitted_half_open_calls: 2,
        }
    }

    #[test]
    fn opens_after_failure_rate_with_minimum_calls() {
        let breaker = CircuitBreaker::new(key(), config());

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.try_acquire().is_ok(), "below minimum sample size");

        breaker.record_failure();
        assert!(matches!(
            breaker.try_acquire(),
            Err(EngineError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn successes_keep_it_closed() {
        let breaker = CircuitBreaker::new(key(), config());
        for _ in 0..10 {
            breaker.record_success(Duration::from_millis(5));
        }
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn slow_calls_open_the_breaker() {
        let mut cfg = config();
        cfg.slow_call_rate_threshold = 0.5;
        let breaker = CircuitBreaker::new(key(), cfg);

        for _ in 0..3 {
            breaker.record_success(Duration::from_secs(60));
        }
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test]
    async fn half_open_admits_exactly_permitted_trials() {
        let breaker = CircuitBreaker::new(key(), config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.try_acquire().is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;

        // permitted_half_open_calls = 2
        assert!(breaker.try_acquire().is_ok());
        assert!(breaker.try_acquire().is_ok());
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test]
    async fn trial_success_closes_trial_failure_reopens() {
        let breaker = CircuitBreaker::new(key(), config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(breaker.try_acquire().is_ok());
        breaker.record_success(Duration::from_millis(1));
        assert!(breaker.try_acquire().is_ok());
        breaker.record_success(Duration::from_millis(1));
        assert_eq!(breaker.state(), CircuitState::Closed);

        // Trip it again, then fail the trial.
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(breaker.try_acquire().is_ok());
        breaker.record_failure();
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
    }

    #[test]
    fn forced_open_rejects_until_reset() {
        let breaker = CircuitBreaker::new(key(), config());
        breaker.force_open();
        assert!(breaker.try_acquire().is_err());
        breaker.record_success(Duration::from_millis(1));
        assert!(breaker.try_acquire().is_err());

        breaker.reset();
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn disabled_admits_everything() {
        let breaker = CircuitBreaker::new(key(), config());
        breaker.disable();
        for _ in 0..20 {
            breaker.record_failure();
        }
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn registry_shares_one_breaker_per_key() {
        let registry = BreakerRegistry::new(config());
        let a = registry.breaker_for(&key());
        let b = registry.breaker_for(&key());
        assert!(Arc::ptr_eq(&a, &b));

        let other = TargetKey {
            username: "root".into(),
            host: "db02".into(),
            port: 22,
        };
        let c = registry.breaker_for(&other);
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
