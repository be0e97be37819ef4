//! Step-lifecycle events
//!
//! The orchestrator emits an ordered event stream to a caller-supplied
//! sink; the engine assumes nothing about the transport behind it. Every
//! event is also appended to the owning session's log.

use crate::engine::session::SessionStatus;
use crate::interact::InteractionRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    SessionStarted {
        session_id: Uuid,
        workflow: String,
        total_steps: usize,
        timestamp: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: Uuid,
        status: SessionStatus,
        failed_steps: Vec<String>,
        skipped_steps: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        session_id: Uuid,
        step_index: usize,
        unit_id: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        session_id: Uuid,
        step_index: usize,
        unit_id: String,
        output: Option<String>,
        timestamp: DateTime<Utc>,
    },
    StepSkipped {
        session_id: Uuid,
        step_index: usize,
        unit_id: String,
        condition: String,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        session_id: Uuid,
        step_index: usize,
        unit_id: String,
        error: String,
        fatal: bool,
        timestamp: DateTime<Utc>,
    },
    InteractionRequested {
        session_id: Uuid,
        step_index: usize,
        request: InteractionRequest,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        timestamp: DateTime<Utc>,
    },
    Progress {
        session_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn session_id(&self) -> Uuid {
        use ExecutionEvent::*;
        match self {
            SessionStarted { session_id, .. }
            | SessionCompleted { session_id, .. }
            | StepStarted { session_id, .. }
            | StepCompleted { session_id, .. }
            | StepSkipped { session_id, .. }
            | StepFailed { session_id, .. }
            | InteractionRequested { session_id, .. }
            | StatusChanged { session_id, .. }
            | Progress { session_id, .. } => *session_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        use ExecutionEvent::*;
        match self {
            SessionStarted { timestamp, .. }
            | SessionCompleted { timestamp, .. }
            | StepStarted { timestamp, .. }
            | StepCompleted { timestamp, .. }
            | StepSkipped { timestamp, .. }
            | StepFailed { timestamp, .. }
            | InteractionRequested { timestamp, .. }
            | StatusChanged { timestamp, .. }
            | Progress { timestamp, .. } => *timestamp,
        }
    }
}

/// Caller-supplied event destination.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecutionEvent);
}

/// Pushes events onto an unbounded channel; the caller drains the receiver.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ExecutionEvent) {
        // A dropped receiver means nobody is watching; that is allowed.
        let _ = self.tx.send(event);
    }
}

/// Logs events through tracing. Useful as a default sink in tools.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ExecutionEvent) {
        info!(session = %event.session_id(), event = ?event, "execution event");
    }
}

/// Collects events into memory. Test helper.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: ExecutionEvent) {
        self.events.lock().unwrap().push(event);
    }
}
