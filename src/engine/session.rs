//! Execution sessions
//!
//! One in-flight (or finished) run of a workflow: status, variables, and
//! the ordered event log. Only the orchestrator task that owns a session
//! mutates it; cross-task communication goes through the interaction
//! controller.

use crate::engine::event::ExecutionEvent;
use crate::engine::workflow::AggregateWorkflow;
use crate::error::{EngineError, EngineResult};
use crate::remote::target::ConnectionTarget;
use crate::variables::{VariableContext, VariableTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Preparing,
    Executing,
    WaitingInput,
    WaitingConfirm,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Legal transitions: forward-only, except the suspension states and
    /// pause, which bounce back to executing.
    fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match self {
            Preparing => matches!(to, Executing | Failed | Cancelled),
            Executing => matches!(
                to,
                WaitingInput | WaitingConfirm | Paused | Completed | Failed | Cancelled
            ),
            WaitingInput | WaitingConfirm | Paused => {
                matches!(to, Executing | Failed | Cancelled)
            }
            Completed | Failed | Cancelled => false,
        }
    }
}

/// Per-run record the whole engine operates on.
pub struct ExecutionSession {
    pub id: Uuid,
    pub workflow: AggregateWorkflow,
    pub target: ConnectionTarget,
    pub variables: VariableContext,
    status: SessionStatus,
    events: Vec<ExecutionEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Unit ids of steps skipped by their condition.
    pub skipped_steps: Vec<String>,
    /// Unit ids of steps that failed (fatal or recorded-and-continued).
    pub failed_steps: Vec<String>,
}

impl ExecutionSession {
    pub fn new(
        workflow: AggregateWorkflow,
        target: ConnectionTarget,
        initial_variables: HashMap<String, crate::variables::VariableValue>,
    ) -> Self {
        let mut variables = VariableContext::new();
        variables.merge(initial_variables, VariableTier::Configuration);

        // Target facts are always resolvable for interpolation and conditions.
        variables.set(
            "target_host",
            target.host.clone().into(),
            VariableTier::SystemFact,
        );
        variables.set(
            "target_user",
            target.username.clone().into(),
            VariableTier::SystemFact,
        );
        variables.set(
            "workflow_name",
            workflow.name.clone().into(),
            VariableTier::SystemFact,
        );

        Self {
            id: Uuid::new_v4(),
            workflow,
            target,
            variables,
            status: SessionStatus::Preparing,
            events: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            skipped_steps: Vec::new(),
            failed_steps: Vec::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Apply a status transition, rejecting illegal ones.
    pub fn transition(&mut self, to: SessionStatus) -> EngineResult<SessionStatus> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::Validation(format!(
                "illegal session transition {:?} -> {to:?}",
                self.status
            )));
        }
        let from = self.status;
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        debug!(session = %self.id, ?from, ?to, "session status changed");
        Ok(from)
    }

    pub fn record_event(&mut self, event: ExecutionEvent) {
        self.events.push(event);
    }

    /// The ordered event log accumulated so far.
    pub fn events(&self) -> &[ExecutionEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::target::Secret;

    fn session() -> ExecutionSession {
        ExecutionSession::new(
            AggregateWorkflow {
                name: "wf".into(),
                steps: vec![],
            },
            ConnectionTarget {
                host: "h".into(),
                port: 22,
                username: "u".into(),
                secret: Secret::Password("p".into()),
                connect_timeout: std::time::Duration::from_secs(1),
                execute_timeout: std::time::Duration::from_secs(1),
            },
            HashMap::new(),
        )
    }

    #[test]
    fn waiting_states_bounce_back_to_executing() {
        let mut s = session();
        s.transition(SessionStatus::Executing).unwrap();
        s.transition(SessionStatus::WaitingConfirm).unwrap();
        s.transition(SessionStatus::Executing).unwrap();
        s.transition(SessionStatus::Paused).unwrap();
        s.transition(SessionStatus::Executing).unwrap();
        s.transition(SessionStatus::Completed).unwrap();
    }

    #[test]
    fn terminal_states_are_final() {
        let mut s = session();
        s.transition(SessionStatus::Executing).unwrap();
        s.transition(SessionStatus::Completed).unwrap();
        assert!(s.transition(SessionStatus::Executing).is_err());
        assert!(s.transition(SessionStatus::Failed).is_err());
    }

    #[test]
    fn preparing_cannot_jump_to_waiting() {
        let mut s = session();
        assert!(s.transition(SessionStatus::WaitingInput).is_err());
    }

    #[test]
    fn target_facts_are_seeded() {
        let s = session();
        assert!(s.variables.resolve("target_host").is_some());
        assert!(s.variables.resolve("workflow_name").is_some());
    }
}
