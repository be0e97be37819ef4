//! Error taxonomy for the workflow engine
//!
//! Every failure the engine can surface is a variant here. The split that
//! matters operationally is [`EngineError::is_transient`]: transient errors
//! are retried by the resilience wrapper, everything else propagates straight
//! to the step's failure policy.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Network-class failure while connecting to or talking to a remote host.
    #[error("connection error: {0}")]
    Connection(String),

    /// No pooled session became available within the borrow timeout.
    #[error("session pool exhausted for {target} after {waited:?}")]
    PoolExhausted { target: String, waited: Duration },

    /// The circuit breaker for the target is open; no network attempt was made.
    #[error("circuit open for {target}")]
    CircuitOpen { target: String },

    /// A unit definition, parameter value, or request was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required variable resolved to nothing at every tier.
    #[error("required variable '{0}' is undefined")]
    DependencyUnmet(String),

    /// The remote command ran but reported failure.
    #[error("unit '{unit}' failed with exit status {status}: {stderr}")]
    UnitExecution {
        unit: String,
        status: i32,
        stderr: String,
    },

    /// No interaction response arrived before the interaction timeout.
    #[error("interaction '{0}' timed out")]
    InteractionTimeout(String),

    /// A workflow referenced a unit id the registry does not know.
    #[error("unknown unit '{0}'")]
    UnitNotFound(String),

    /// A variable value could not be converted to the requested type.
    #[error("cannot convert '{value}' to {target_type}")]
    Conversion {
        value: String,
        target_type: &'static str,
    },

    /// The admission queue is full; the submission was rejected for backpressure.
    #[error("admission queue full ({capacity} submissions pending)")]
    QueueFull { capacity: usize },

    /// The run exceeded its overall time ceiling.
    #[error("session exceeded time limit of {0:?}")]
    SessionTimeout(Duration),

    /// The session was cancelled by an external request.
    #[error("session cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the resilience wrapper may retry this error.
    ///
    /// Only network-class failures qualify. Validation, missing variables,
    /// failed commands and the like are deterministic and retrying them
    /// would just repeat the failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Connection(_) | EngineError::PoolExhausted { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EngineError::Connection("refused".into()).is_transient());
        assert!(EngineError::PoolExhausted {
            target: "root@h:22".into(),
            waited: Duration::from_secs(30),
        }
        .is_transient());

        assert!(!EngineError::Validation("bad".into()).is_transient());
        assert!(!EngineError::DependencyUnmet("x".into()).is_transient());
        assert!(!EngineError::CircuitOpen {
            target: "root@h:22".into()
        }
        .is_transient());
        assert!(!EngineError::UnitNotFound("nope".into()).is_transient());
    }
}
