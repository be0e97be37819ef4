//! Transport seam for remote command execution
//!
//! The engine never talks to the network directly; it goes through
//! [`CommandTransport`], which opens authenticated channels, and
//! [`RemoteChannel`], which runs commands over one. Production uses
//! [`SshTransport`]; tests swap in the mock from [`super::mock`].

use crate::error::{EngineError, EngineResult};
use crate::remote::target::{ConnectionTarget, Secret};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Successful output with the given stdout. Test and mock helper.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given status and stderr. Test and mock helper.
    pub fn err(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Opens authenticated channels to remote targets.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget) -> EngineResult<Box<dyn RemoteChannel>>;
}

/// One live authenticated channel to a remote host.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Run a command, bounded by `timeout`.
    async fn exec(&mut self, command: &str, timeout: Duration) -> EngineResult<CommandOutput>;

    /// Close the underlying transport. Best-effort: implementations swallow
    /// secondary errors from an already-broken channel.
    async fn close(&mut self);
}

/// SSH transport that shells out to the system `ssh` client.
///
/// Key-file auth goes through `-i`; password auth is delegated to `sshpass`,
/// which must be installed on the operator host.
pub struct SshTransport;

#[async_trait]
impl CommandTransport for SshTransport {
    async fn connect(&self, target: &ConnectionTarget) -> EngineResult<Box<dyn RemoteChannel>> {
        let mut channel = SshChannel {
            target: target.clone(),
            closed: false,
        };
        // Authenticate eagerly so acquire fails here, not on first exec.
        let probe = channel.exec("true", target.connect_timeout).await?;
        if !probe.success() {
            return Err(EngineError::Connection(format!(
                "authentication probe to {} exited with status {}: {}",
                target.key(),
                probe.status,
                probe.stderr.trim()
            )));
        }
        debug!(target = %target.key(), "ssh channel established");
        Ok(Box::new(channel))
    }
}

struct SshChannel {
    target: ConnectionTarget,
    closed: bool,
}

impl SshChannel {
    fn build_command(&self, remote_command: &str) -> Command {
        let mut cmd = match &self.target.secret {
            Secret::Password(password) => {
                let mut c = Command::new("sshpass");
                c.arg("-p").arg(password).arg("ssh");
                c
            }
            Secret::KeyFile(path) => {
                let mut c = Command::new("ssh");
                c.arg("-i").arg(path);
                c
            }
        };
        cmd.arg("-o")
            .arg("BatchMode=no")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg(format!("{}@{}", self.target.username, self.target.host))
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn exec(&mut self, command: &str, timeout: Duration) -> EngineResult<CommandOutput> {
        if self.closed {
            return Err(EngineError::Connection(format!(
                "channel to {} is closed",
                self.target.key()
            )));
        }

        let child = self
            .build_command(command)
            .spawn()
            .map_err(|e| EngineError::Connection(format!("failed to spawn ssh: {e}")))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                EngineError::Connection(format!(
                    "command on {} timed out after {timeout:?}",
                    self.target.key()
                ))
            })?
            .map_err(|e| EngineError::Connection(format!("ssh io error: {e}")))?;

        // ssh reports 255 for its own transport failures, as opposed to the
        // remote command's exit status.
        let status = output.status.code().unwrap_or(-1);
        if status == 255 {
            return Err(EngineError::Connection(format!(
                "ssh transport failure to {}: {}",
                self.target.key(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn close(&mut self) {
        // Each exec is its own ssh process, so there is no persistent
        // transport to tear down beyond marking the channel unusable.
        self.closed = true;
    }
}
