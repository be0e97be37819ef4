//! Connection targets and their pool/breaker identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Credential material for a remote target.
///
/// Debug output is redacted so secrets never land in logs or events.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Secret {
    Password(String),
    KeyFile(PathBuf),
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Password(_) => write!(f, "Password(<redacted>)"),
            Secret::KeyFile(path) => write!(f, "KeyFile({})", path.display()),
        }
    }
}

/// A remote host to provision, with credentials and transport timeouts.
///
/// Immutable once a run starts; identity for pooling and circuit breaking
/// is `(username, host, port)` via [`ConnectionTarget::key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    pub secret: Secret,

    /// Bound on session creation.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Bound on each remote command.
    #[serde(default = "default_execute_timeout", with = "humantime_serde")]
    pub execute_timeout: Duration,
}

impl ConnectionTarget {
    pub fn key(&self) -> TargetKey {
        TargetKey {
            username: self.username.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Pool and circuit-breaker key: all callers hitting the same
/// `(username, host, port)` share one pool and one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub username: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_execute_timeout() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(host: &str, port: u16, user: &str) -> ConnectionTarget {
        ConnectionTarget {
            host: host.to_string(),
            port,
            username: user.to_string(),
            secret: Secret::Password("hunter2".into()),
            connect_timeout: default_connect_timeout(),
            execute_timeout: default_execute_timeout(),
        }
    }

    #[test]
    fn key_identity_ignores_secret_and_timeouts() {
        let mut a = target("db01", 22, "root");
        let mut b = target("db01", 22, "root");
        a.secret = Secret::Password("one".into());
        b.secret = Secret::KeyFile(PathBuf::from("/id"));
        b.execute_timeout = Duration::from_secs(5);
        assert_eq!(a.key(), b.key());

        let c = target("db01", 2222, "root");
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let rendered = format!("{:?}", Secret::Password("hunter2".into()));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn key_display() {
        assert_eq!(target("web01", 22, "deploy").key().to_string(), "deploy@web01:22");
    }
}
