//! Interactive suspension
//!
//! A step that needs a human parks its task on a oneshot channel keyed by
//! correlation id; whatever UI surfaced the request calls [`respond`] from
//! another task to resume it. Suspended workflows hold no worker thread,
//! only a parked future. This is the one thread-safe cross-task entry point
//! into a running session.
//!
//! [`respond`]: InteractionController::respond

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Confirmation,
    YesNo,
    Text,
    Password,
    Form,
    Select,
    MultiSelect,
    FileUpload,
}

impl InteractionKind {
    /// Confirmation-style kinds park the session in WaitingConfirm;
    /// everything else is WaitingInput.
    pub fn is_confirmation(&self) -> bool {
        matches!(self, InteractionKind::Confirmation | InteractionKind::YesNo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub correlation_id: String,
    pub kind: InteractionKind,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl InteractionRequest {
    pub fn new(kind: InteractionKind, prompt: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            kind,
            prompt: prompt.into(),
            options: Vec::new(),
            required: true,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResponse {
    pub correlation_id: String,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl InteractionResponse {
    pub fn new(correlation_id: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// A registered request waiting for its response.
pub struct InteractionTicket {
    correlation_id: String,
    rx: oneshot::Receiver<InteractionResponse>,
}

pub struct InteractionController {
    pending: Mutex<HashMap<String, oneshot::Sender<InteractionResponse>>>,
    resolved: Mutex<HashSet<String>>,
    default_timeout: Duration,
}

impl InteractionController {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            resolved: Mutex::new(HashSet::new()),
            default_timeout,
        }
    }

    /// Register a request before it is announced, so a response can never
    /// race the announcement.
    pub fn register(&self, request: &InteractionRequest) -> InteractionTicket {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(request.correlation_id.clone(), tx);
        debug!(correlation = %request.correlation_id, kind = ?request.kind, "interaction registered");
        InteractionTicket {
            correlation_id: request.correlation_id.clone(),
            rx,
        }
    }

    /// Park until the matching response, the timeout, or cancellation.
    pub async fn await_response(
        &self,
        ticket: InteractionTicket,
        timeout: Option<Duration>,
        cancel: &mut watch::Receiver<bool>,
    ) -> EngineResult<InteractionResponse> {
        let InteractionTicket { correlation_id, rx } = ticket;
        let timeout = timeout.unwrap_or(self.default_timeout);

        tokio::select! {
            outcome = tokio::time::timeout(timeout, rx) => match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(EngineError::Cancelled),
                Err(_) => {
                    warn!(correlation = %correlation_id, "interaction timed out");
                    self.pending.lock().unwrap().remove(&correlation_id);
                    Err(EngineError::InteractionTimeout(correlation_id))
                }
            },
            _ = cancel.wait_for(|cancelled| *cancelled) => {
                self.pending.lock().unwrap().remove(&correlation_id);
                Err(EngineError::Cancelled)
            }
        }
    }

    /// Deliver a response to the parked requester.
    ///
    /// A duplicate response to an already-resolved id is a no-op; a
    /// response nothing is waiting for is rejected.
    pub fn respond(&self, response: InteractionResponse) -> EngineResult<()> {
        let id = response.correlation_id.clone();
        let sender = self.pending.lock().unwrap().remove(&id);
        match sender {
            Some(tx) => {
                self.resolved.lock().unwrap().insert(id.clone());
                // The requester may have been cancelled between our map
                // lookup and this send; that is not the responder's problem.
                let _ = tx.send(response);
                debug!(correlation = %id, "interaction resolved");
                Ok(())
            }
            None if self.resolved.lock().unwrap().contains(&id) => Ok(()),
            None => Err(EngineError::Validation(format!(
                "no pending interaction for correlation id '{id}'"
            ))),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn round_trip_delivers_payload() {
        let controller = Arc::new(InteractionController::new(Duration::from_secs(5)));
        let request = InteractionRequest::new(InteractionKind::YesNo, "Proceed?");
        let id = request.correlation_id.clone();

        let ticket = controller.register(&request);

        let responder = Arc::clone(&controller);
        let respond_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            responder
                .respond(InteractionResponse::new(respond_id, json!(true)))
                .unwrap();
        });

        let (_tx, mut cancel) = cancel_channel();
        let response = controller
            .await_response(ticket, None, &mut cancel)
            .await
            .unwrap();
        assert_eq!(response.payload, json!(true));
        assert_eq!(controller.pending_count(), 0);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_interaction_timeout() {
        let controller = InteractionController::new(Duration::from_millis(20));
        let request = InteractionRequest::new(InteractionKind::Text, "Name?");
        let ticket = controller.register(&request);

        let (_tx, mut cancel) = cancel_channel();
        let err = controller
            .await_response(ticket, None, &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InteractionTimeout(_)));
    }

    #[tokio::test]
    async fn unknown_correlation_id_is_rejected() {
        let controller = InteractionController::new(Duration::from_secs(1));
        let err = controller
            .respond(InteractionResponse::new("ghost", json!(null)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_response_is_a_noop() {
        let controller = Arc::new(InteractionController::new(Duration::from_secs(5)));
        let request = InteractionRequest::new(InteractionKind::Confirmation, "Ok?");
        let id = request.correlation_id.clone();
        let ticket = controller.register(&request);

        controller
            .respond(InteractionResponse::new(id.clone(), json!("yes")))
            .unwrap();
        // Second correct response: accepted silently.
        controller
            .respond(InteractionResponse::new(id, json!("yes")))
            .unwrap();

        let (_tx, mut cancel) = cancel_channel();
        let response = controller
            .await_response(ticket, None, &mut cancel)
            .await
            .unwrap();
        assert_eq!(response.payload, json!("yes"));
    }

    #[tokio::test]
    async fn cancellation_unparks_the_waiter() {
        let controller = InteractionController::new(Duration::from_secs(60));
        let request = InteractionRequest::new(InteractionKind::YesNo, "Proceed?");
        let ticket = controller.register(&request);

        let (tx, mut cancel) = cancel_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
        });

        let err = controller
            .await_response(ticket, None, &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
