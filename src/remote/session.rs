//! One live authenticated remote session

use crate::error::{EngineError, EngineResult};
use crate::remote::target::ConnectionTarget;
use crate::remote::transport::{CommandOutput, CommandTransport, RemoteChannel};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// A connected, authenticated session owned by the pool.
pub struct RemoteSession {
    id: Uuid,
    target: ConnectionTarget,
    channel: Box<dyn RemoteChannel>,
    last_used: Instant,
}

impl RemoteSession {
    /// Connect and authenticate, bounded by the target's connect timeout.
    pub(crate) async fn open(
        transport: &dyn CommandTransport,
        target: &ConnectionTarget,
    ) -> EngineResult<Self> {
        let channel = tokio::time::timeout(target.connect_timeout, transport.connect(target))
            .await
            .map_err(|_| {
                EngineError::Connection(format!(
                    "connect to {} timed out after {:?}",
                    target.key(),
                    target.connect_timeout
                ))
            })??;

        let session = Self {
            id: Uuid::new_v4(),
            target: target.clone(),
            channel,
            last_used: Instant::now(),
        };
        debug!(session = %session.id, target = %target.key(), "remote session opened");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run a command over this session, bounded by the target's execute timeout.
    pub async fn exec(&mut self, command: &str) -> EngineResult<CommandOutput> {
        self.last_used = Instant::now();
        self.channel
            .exec(command, self.target.execute_timeout)
            .await
    }

    /// Cheap no-op roundtrip; a session that cannot run `true` is invalid.
    pub async fn validate(&mut self) -> bool {
        matches!(self.exec("true").await, Ok(out) if out.success())
    }

    /// Close the underlying transport, swallowing secondary errors.
    pub async fn close(&mut self) {
        self.channel.close().await;
        debug!(session = %self.id, "remote session closed");
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}
