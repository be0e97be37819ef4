//! Scripted transport for tests
//!
//! Mirrors the production transport seam without touching the network:
//! responses are matched by command substring, connect attempts can be made
//! to fail, and every executed command is recorded for assertions.

use crate::error::{EngineError, EngineResult};
use crate::remote::target::ConnectionTarget;
use crate::remote::transport::{CommandOutput, CommandTransport, RemoteChannel};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    /// Substring-matched scripted responses, first match wins.
    responses: Vec<(String, CommandOutput)>,
    /// Fail this many connect attempts before succeeding.
    connect_failures: usize,
    /// Fail this many exec calls (across channels) with a connection error.
    exec_failures: usize,
    connect_count: usize,
    executed: Vec<String>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                responses: Vec::new(),
                connect_failures: 0,
                exec_failures: 0,
                connect_count: 0,
                executed: Vec::new(),
            })),
        }
    }

    /// Script a response for any command containing `pattern`.
    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((pattern.to_string(), output));
    }

    /// Make the next `n` connect attempts fail with a connection error.
    pub fn fail_connects(&self, n: usize) {
        self.state.lock().unwrap().connect_failures = n;
    }

    /// Make the next `n` exec calls fail with a connection error.
    pub fn fail_execs(&self, n: usize) {
        self.state.lock().unwrap().exec_failures = n;
    }

    /// How many connect attempts were made, including scripted failures.
    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_count
    }

    /// Every command executed across all channels, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }
}

#[async_trait]
impl CommandTransport for MockTransport {
    async fn connect(&self, target: &ConnectionTarget) -> EngineResult<Box<dyn RemoteChannel>> {
        let mut state = self.state.lock().unwrap();
        state.connect_count += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(EngineError::Connection(format!(
                "mock connect refused for {}",
                target.key()
            )));
        }
        Ok(Box::new(MockChannel {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl RemoteChannel for MockChannel {
    async fn exec(&mut self, command: &str, _timeout: Duration) -> EngineResult<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(command.to_string());
        if state.exec_failures > 0 {
            state.exec_failures -= 1;
            return Err(EngineError::Connection("mock connection reset".to_string()));
        }
        for (pattern, output) in &state.responses {
            if command.contains(pattern.as_str()) {
                return Ok(output.clone());
            }
        }
        // Unscripted commands succeed silently, like the validation no-op.
        Ok(CommandOutput::ok(""))
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::target::Secret;

    fn target() -> ConnectionTarget {
        ConnectionTarget {
            host: "mock".into(),
            port: 22,
            username: "root".into(),
            secret: Secret::Password("x".into()),
            connect_timeout: Duration::from_secs(1),
            execute_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn scripted_responses_match_by_substring() {
        let transport = MockTransport::new();
        transport.respond("uname", CommandOutput::ok("os_name=linux\n"));

        let mut channel = transport.connect(&target()).await.unwrap();
        let out = channel
            .exec("uname -s", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out.stdout, "os_name=linux\n");
        assert_eq!(transport.executed(), vec!["uname -s".to_string()]);
    }

    #[tokio::test]
    async fn connect_failures_are_consumed() {
        let transport = MockTransport::new();
        transport.fail_connects(1);

        assert!(transport.connect(&target()).await.is_err());
        assert!(transport.connect(&target()).await.is_ok());
        assert_eq!(transport.connect_count(), 2);
    }
}
