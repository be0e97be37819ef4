//! Engine configuration
//!
//! All knobs for the session pool, resilience wrapper, worker pool, and
//! timeout layers. Deserializable from YAML or JSON with per-field defaults,
//! so a config file only needs to name what it changes.

use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Session pool settings, applied per connection target.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Retry policy applied around pool borrows and remote executes.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Circuit breaker settings, applied per connection target.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Worker pool and admission settings.
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Default timeout for a suspended interactive step.
    #[serde(
        default = "default_interaction_timeout",
        with = "humantime_serde"
    )]
    pub interaction_timeout: Duration,

    /// Optional ceiling on a whole session run.
    #[serde(default, with = "humantime_serde")]
    pub session_timeout: Option<Duration>,
}

/// Per-target session pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum live sessions (idle + borrowed) per target.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Idle sessions kept through eviction passes.
    #[serde(default)]
    pub min_idle: usize,

    /// How long a session may sit idle before eviction.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Interval between idle-eviction passes.
    #[serde(default = "default_eviction_interval", with = "humantime_serde")]
    pub eviction_interval: Duration,

    /// How long a borrower waits when the pool is at max size.
    #[serde(default = "default_borrow_timeout", with = "humantime_serde")]
    pub borrow_timeout: Duration,

    /// Validate idle sessions with a no-op roundtrip before handing them out.
    #[serde(default = "default_test_on_borrow")]
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            min_idle: 0,
            idle_timeout: default_idle_timeout(),
            eviction_interval: default_eviction_interval(),
            borrow_timeout: default_borrow_timeout(),
            test_on_borrow: default_test_on_borrow(),
        }
    }
}

/// Worker pool and admission queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sessions executing concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Submissions allowed to wait for a worker. Beyond this, submissions
    /// are rejected immediately.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_max_size() -> usize {
    4
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_eviction_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_borrow_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_test_on_borrow() -> bool {
    true
}

fn default_max_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    32
}

fn default_interaction_timeout() -> Duration {
    Duration::from_secs(300)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_yaml() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.workers.max_workers, 8);
        assert_eq!(config.workers.queue_capacity, 32);
        assert_eq!(config.interaction_timeout, Duration::from_secs(300));
        assert!(config.session_timeout.is_none());
    }

    #[test]
    fn partial_override() {
        let yaml = r#"
pool:
  max_size: 2
  borrow_timeout: 5s
session_timeout: 10m
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pool.max_size, 2);
        assert_eq!(config.pool.borrow_timeout, Duration::from_secs(5));
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.session_timeout, Some(Duration::from_secs(600)));
    }
}
