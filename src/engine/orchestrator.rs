//! Workflow orchestration
//!
//! Owns the shared infrastructure (unit registry, session pool, breaker
//! registry, interaction controller) and hands it to per-session tasks by
//! handle. Each submission runs on its own tokio task inside a fixed-size
//! worker pool with a bounded admission queue; submissions beyond queue
//! capacity are rejected immediately for backpressure.

use crate::config::EngineConfig;
use crate::engine::event::{EventSink, ExecutionEvent};
use crate::engine::executor::StepExecutor;
use crate::engine::session::{ExecutionSession, SessionStatus};
use crate::engine::workflow::{AggregateWorkflow, FailurePolicy, StepOutcome};
use crate::error::{EngineError, EngineResult};
use crate::interact::{InteractionController, InteractionResponse};
use crate::remote::pool::SessionPool;
use crate::remote::target::ConnectionTarget;
use crate::remote::transport::CommandTransport;
use crate::resilience::{BreakerRegistry, ResilienceWrapper};
use crate::units::UnitRegistry;
use crate::variables::{VariableTier, VariableValue};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

struct SessionHandle {
    cancel: watch::Sender<bool>,
    pause: watch::Sender<bool>,
    join: JoinHandle<ExecutionSession>,
}

pub struct Orchestrator {
    config: EngineConfig,
    registry: Arc<UnitRegistry>,
    pool: Arc<SessionPool>,
    resilience: Arc<ResilienceWrapper>,
    interactions: Arc<InteractionController>,
    sink: Arc<dyn EventSink>,
    workers: Arc<Semaphore>,
    admission: Arc<Semaphore>,
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        registry: UnitRegistry,
        transport: Arc<dyn CommandTransport>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let pool = SessionPool::new(transport, config.pool.clone());
        pool.spawn_evictor();

        let breakers = Arc::new(BreakerRegistry::new(config.circuit_breaker.clone()));
        let resilience = Arc::new(ResilienceWrapper::new(config.retry.clone(), breakers));
        let interactions = Arc::new(InteractionController::new(config.interaction_timeout));

        let workers = Arc::new(Semaphore::new(config.workers.max_workers));
        let admission = Arc::new(Semaphore::new(
            config.workers.max_workers + config.workers.queue_capacity,
        ));

        Arc::new(Self {
            config,
            registry: Arc::new(registry),
            pool,
            resilience,
            interactions,
            sink,
            workers,
            admission,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.resilience.breakers()
    }

    /// Submit a workflow for execution against a target.
    ///
    /// Fails fast on unknown unit ids and on a full admission queue; on
    /// success the run proceeds on its own task and the returned session id
    /// identifies it in the event stream.
    pub fn start_workflow(
        self: &Arc<Self>,
        workflow: AggregateWorkflow,
        initial_variables: HashMap<String, VariableValue>,
        target: ConnectionTarget,
    ) -> EngineResult<Uuid> {
        for step in &workflow.steps {
            if !self.registry.contains(&step.unit_id) {
                return Err(EngineError::UnitNotFound(step.unit_id.clone()));
            }
        }

        let admission_permit = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| EngineError::QueueFull {
                capacity: self.config.workers.queue_capacity,
            })?;

        let session = ExecutionSession::new(workflow, target, initial_variables);
        let session_id = session.id;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (pause_tx, pause_rx) = watch::channel(false);

        let orchestrator = Arc::clone(self);
        let join = tokio::spawn(async move {
            let _admission_permit = admission_permit;
            // Queued submissions wait here until a worker frees up.
            let _worker_permit = Arc::clone(&orchestrator.workers)
                .acquire_owned()
                .await
                .expect("worker semaphore never closes");
            orchestrator.run_session(session, cancel_rx, pause_rx).await
        });

        self.sessions.lock().unwrap().insert(
            session_id,
            SessionHandle {
                cancel: cancel_tx,
                pause: pause_tx,
                join,
            },
        );

        info!(session = %session_id, "workflow submitted");
        Ok(session_id)
    }

    /// Deliver an interaction response from whatever UI surfaced the request.
    pub fn submit_interaction_response(
        &self,
        correlation_id: &str,
        payload: serde_json::Value,
    ) -> EngineResult<()> {
        self.interactions
            .respond(InteractionResponse::new(correlation_id, payload))
    }

    /// Request cancellation. Best-effort: the owning task unwinds at its
    /// next suspension point, releases any borrowed session, and finishes
    /// as cancelled.
    pub fn cancel(&self, session_id: Uuid) -> EngineResult<()> {
        let sessions = self.sessions.lock().unwrap();
        let handle = sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown session {session_id}")))?;
        let _ = handle.cancel.send(true);
        Ok(())
    }

    /// Hold the session before its next step.
    pub fn pause(&self, session_id: Uuid) -> EngineResult<()> {
        self.set_paused(session_id, true)
    }

    /// Resume a paused session.
    pub fn resume(&self, session_id: Uuid) -> EngineResult<()> {
        self.set_paused(session_id, false)
    }

    fn set_paused(&self, session_id: Uuid, paused: bool) -> EngineResult<()> {
        let sessions = self.sessions.lock().unwrap();
        let handle = sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown session {session_id}")))?;
        let _ = handle.pause.send(paused);
        Ok(())
    }

    /// Wait for a session to finish and take its final record.
    pub async fn wait(&self, session_id: Uuid) -> EngineResult<ExecutionSession> {
        let handle = self
            .sessions
            .lock()
            .unwrap()
            .remove(&session_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown session {session_id}")))?;
        handle
            .join
            .await
            .map_err(|e| EngineError::Validation(format!("session task panicked: {e}")))
    }

    /// The session run loop: the per-step algorithm applied top to bottom,
    /// with pause, cancellation, and the overall time ceiling folded in.
    async fn run_session(
        self: Arc<Self>,
        mut session: ExecutionSession,
        mut cancel: watch::Receiver<bool>,
        mut pause: watch::Receiver<bool>,
    ) -> ExecutionSession {
        let executor = StepExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            Arc::clone(&self.resilience),
            Arc::clone(&self.interactions),
            Arc::clone(&self.sink),
            self.config.interaction_timeout,
        );

        let event = ExecutionEvent::SessionStarted {
            session_id: session.id,
            workflow: session.workflow.name.clone(),
            total_steps: session.workflow.steps.len(),
            timestamp: Utc::now(),
        };
        self.emit(&mut session, event);
        if self.set_status(&mut session, SessionStatus::Executing).is_err() {
            return session;
        }

        let deadline = self
            .config
            .session_timeout
            .map(|ttl| (ttl, tokio::time::Instant::now() + ttl));

        let step_count = session.workflow.steps.len();
        let mut fatal = false;
        let mut cancelled = false;

        for index in 0..step_count {
            if *cancel.borrow() {
                cancelled = true;
                break;
            }

            // An externally requested hold parks the loop between steps.
            if *pause.borrow() {
                if self.set_status(&mut session, SessionStatus::Paused).is_err() {
                    break;
                }
                tokio::select! {
                    _ = pause.wait_for(|paused| !*paused) => {
                        if self.set_status(&mut session, SessionStatus::Executing).is_err() {
                            break;
                        }
                    }
                    _ = cancel.wait_for(|cancelled| *cancelled) => {
                        cancelled = true;
                        break;
                    }
                }
            }

            let unit_id = session.workflow.steps[index].unit_id.clone();
            let policy = session.workflow.steps[index].failure_policy;

            let outcome = match deadline {
                Some((ttl, at)) => {
                    match tokio::time::timeout_at(
                        at,
                        executor.execute_step(&mut session, index, &mut cancel),
                    )
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => StepOutcome::Failed {
                            error: EngineError::SessionTimeout(ttl),
                        },
                    }
                }
                None => executor.execute_step(&mut session, index, &mut cancel).await,
            };

            match outcome {
                StepOutcome::Skipped { condition } => {
                    session.skipped_steps.push(unit_id.clone());
                    let event = ExecutionEvent::StepSkipped {
                        session_id: session.id,
                        step_index: index,
                        unit_id,
                        condition,
                        timestamp: Utc::now(),
                    };
                    self.emit(&mut session, event);
                }
                StepOutcome::Completed { produced, output } => {
                    // Outputs merge only after success, renamed per the
                    // step's mapping, at the runtime-produced tier.
                    let mapping = session.workflow.steps[index].variable_mapping.clone();
                    let mapped = StepOutcome::map_produced(produced, &mapping);
                    session
                        .variables
                        .merge(mapped, VariableTier::RuntimeProduced);
                    let event = ExecutionEvent::StepCompleted {
                        session_id: session.id,
                        step_index: index,
                        unit_id,
                        output,
                        timestamp: Utc::now(),
                    };
                    self.emit(&mut session, event);
                }
                StepOutcome::Failed { error } => {
                    if matches!(error, EngineError::Cancelled) {
                        session.failed_steps.push(unit_id);
                        cancelled = true;
                        break;
                    }

                    let is_fatal = policy == FailurePolicy::Required
                        || matches!(error, EngineError::SessionTimeout(_));
                    session.failed_steps.push(unit_id.clone());
                    let event = ExecutionEvent::StepFailed {
                        session_id: session.id,
                        step_index: index,
                        unit_id: unit_id.clone(),
                        error: error.to_string(),
                        fatal: is_fatal,
                        timestamp: Utc::now(),
                    };
                    self.emit(&mut session, event);

                    if is_fatal {
                        warn!(session = %session.id, unit = %unit_id, error = %error, "required step failed, stopping");
                        fatal = true;
                        break;
                    }
                    // Optional failure: recorded, outputs stay undefined,
                    // the run continues.
                }
            }
        }

        let final_status = if cancelled || *cancel.borrow() {
            SessionStatus::Cancelled
        } else if fatal {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };
        let _ = self.set_status(&mut session, final_status);

        let event = ExecutionEvent::SessionCompleted {
            session_id: session.id,
            status: session.status(),
            failed_steps: session.failed_steps.clone(),
            skipped_steps: session.skipped_steps.clone(),
            timestamp: Utc::now(),
        };
        self.emit(&mut session, event);
        info!(session = %session.id, status = ?session.status(), "session finished");
        session
    }

    fn set_status(&self, session: &mut ExecutionSession, to: SessionStatus) -> EngineResult<()> {
        let from = session.transition(to)?;
        self.emit(
            session,
            ExecutionEvent::StatusChanged {
                session_id: session.id,
                from,
                to,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    fn emit(&self, session: &mut ExecutionSession, event: ExecutionEvent) {
        session.record_event(event.clone());
        self.sink.emit(event);
    }
}
