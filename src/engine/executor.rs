//! Per-step execution
//!
//! Implements the step algorithm: condition gate, dependency resolution,
//! parameter validation, session acquisition through the resilience
//! wrapper, dispatch by source kind, and clean unwind on timeout or
//! cancellation. Returns a tagged [`StepOutcome`]; the orchestrator applies
//! the failure policy.

use crate::condition;
use crate::engine::event::{EventSink, ExecutionEvent};
use crate::engine::session::{ExecutionSession, SessionStatus};
use crate::engine::workflow::{StepOutcome, WorkflowStep};
use crate::error::{EngineError, EngineResult};
use crate::interact::{InteractionController, InteractionKind, InteractionRequest};
use crate::remote::pool::SessionPool;
use crate::remote::target::ConnectionTarget;
use crate::remote::transport::CommandOutput;
use crate::resilience::ResilienceWrapper;
use crate::units::{ScriptUnit, SourceKind, UnitRegistry};
use crate::variables::{VariableTier, VariableValue};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

pub struct StepExecutor {
    registry: Arc<UnitRegistry>,
    pool: Arc<SessionPool>,
    resilience: Arc<ResilienceWrapper>,
    interactions: Arc<InteractionController>,
    sink: Arc<dyn EventSink>,
    interaction_timeout: Duration,
}

impl StepExecutor {
    pub fn new(
        registry: Arc<UnitRegistry>,
        pool: Arc<SessionPool>,
        resilience: Arc<ResilienceWrapper>,
        interactions: Arc<InteractionController>,
        sink: Arc<dyn EventSink>,
        interaction_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            resilience,
            interactions,
            sink,
            interaction_timeout,
        }
    }

    /// Run one step of the session's workflow.
    pub async fn execute_step(
        &self,
        session: &mut ExecutionSession,
        index: usize,
        cancel: &mut watch::Receiver<bool>,
    ) -> StepOutcome {
        let step = session.workflow.steps[index].clone();

        // 1. Condition gate. An undefined condition variable evaluates
        //    false: conditions gate optional enhancements, so a missing
        //    variable skips the step instead of failing it.
        if let Some(expr) = &step.condition {
            match condition::evaluate(expr, &session.variables) {
                Ok(true) => {}
                Ok(false) => {
                    return StepOutcome::Skipped {
                        condition: expr.clone(),
                    }
                }
                Err(error) => return StepOutcome::Failed { error },
            }
        }

        let unit = match self.registry.lookup(&step.unit_id) {
            Ok(unit) => unit.clone(),
            Err(error) => return StepOutcome::Failed { error },
        };

        // 2. Required variables must resolve somewhere in the tier chain.
        for name in &unit.required_variables {
            if session.variables.resolve(name).is_none() {
                return StepOutcome::Failed {
                    error: EngineError::DependencyUnmet(name.clone()),
                };
            }
        }

        // 3. Parameter validation against the unit's declared contract.
        //    String parameters are interpolated first so steps can feed
        //    variables into parameters.
        let supplied = interpolate_parameters(&step, session);
        let params = match unit.validate_parameters(&supplied) {
            Ok(params) => params,
            Err(error) => return StepOutcome::Failed { error },
        };

        self.emit(
            session,
            ExecutionEvent::StepStarted {
                session_id: session.id,
                step_index: index,
                unit_id: step.unit_id.clone(),
                timestamp: Utc::now(),
            },
        );

        match unit.source_kind {
            SourceKind::StaticBuiltin
            | SourceKind::ConfigurableBuiltin
            | SourceKind::UserDefined => {
                self.execute_command_unit(session, &unit, &params, cancel)
                    .await
            }
            SourceKind::InteractiveBuiltin => {
                self.execute_interactive_unit(session, index, &unit, &params, cancel)
                    .await
            }
        }
    }

    /// Command-backed units: acquire a pooled session under the resilience
    /// wrapper, run the generated command, and map its exit status.
    async fn execute_command_unit(
        &self,
        session: &mut ExecutionSession,
        unit: &ScriptUnit,
        params: &HashMap<String, VariableValue>,
        cancel: &mut watch::Receiver<bool>,
    ) -> StepOutcome {
        let template = match &unit.command {
            Some(template) => template,
            None => {
                return StepOutcome::Failed {
                    error: EngineError::Validation(format!("unit '{}' has no command", unit.id)),
                }
            }
        };
        let command = session.variables.interpolate_with(template, params);
        debug!(session = %session.id, unit = %unit.id, %command, "executing remote command");

        let key = session.target.key();
        let pool = Arc::clone(&self.pool);
        let target = session.target.clone();
        let command_for_call = command.clone();

        // Each attempt borrows a session, runs the command, and returns the
        // session on success or invalidates it on a connection failure, so
        // a retry never reuses a broken transport. The breaker sees
        // connection failures, not remote exit statuses.
        let call = self.resilience.call(&key, move || {
            let pool = Arc::clone(&pool);
            let target = target.clone();
            let command = command_for_call.clone();
            async move { run_on_pooled_session(&pool, &target, &command).await }
        });

        let output = tokio::select! {
            result = call => result,
            _ = cancel.wait_for(|cancelled| *cancelled) => {
                return StepOutcome::Failed { error: EngineError::Cancelled };
            }
        };

        match output {
            Ok(output) if output.success() => {
                let produced = parse_produced(unit, &output.stdout);
                StepOutcome::Completed {
                    produced,
                    output: Some(output.stdout),
                }
            }
            Ok(output) => StepOutcome::Failed {
                error: EngineError::UnitExecution {
                    unit: unit.id.clone(),
                    status: output.status,
                    stderr: output.stderr.trim().to_string(),
                },
            },
            Err(error) => StepOutcome::Failed { error },
        }
    }

    /// Interactive units: announce a request, park until the response, and
    /// interpret the payload. No remote session is borrowed while a human
    /// is deciding.
    async fn execute_interactive_unit(
        &self,
        session: &mut ExecutionSession,
        index: usize,
        unit: &ScriptUnit,
        params: &HashMap<String, VariableValue>,
        cancel: &mut watch::Receiver<bool>,
    ) -> StepOutcome {
        let spec = match &unit.interaction {
            Some(spec) => spec.clone(),
            None => {
                return StepOutcome::Failed {
                    error: EngineError::Validation(format!(
                        "unit '{}' has no interaction contract",
                        unit.id
                    )),
                }
            }
        };

        let prompt = session.variables.interpolate_with(&spec.prompt, params);

        // A suggested value turns this interaction into a pending
        // confirmation the user may accept or override.
        let confirms = spec.variable.is_some() && spec.suggested.is_some();
        if let (Some(variable), Some(suggested)) = (&spec.variable, &spec.suggested) {
            session.variables.propose_confirmation(
                variable.clone(),
                suggested.clone(),
                prompt.clone(),
                session.workflow.steps[index].condition.clone(),
            );
        }

        let mut request = InteractionRequest::new(spec.kind, prompt);
        request.options = spec.options.clone();
        request.timeout = spec.timeout;

        let waiting = if spec.kind.is_confirmation() {
            SessionStatus::WaitingConfirm
        } else {
            SessionStatus::WaitingInput
        };

        // Register before announcing so a fast responder cannot race the
        // event.
        let ticket = self.interactions.register(&request);

        if let Err(error) = self.set_status(session, waiting) {
            return StepOutcome::Failed { error };
        }
        self.emit(
            session,
            ExecutionEvent::InteractionRequested {
                session_id: session.id,
                step_index: index,
                request: request.clone(),
                timestamp: Utc::now(),
            },
        );

        let timeout = spec.timeout.or(Some(self.interaction_timeout));
        let response = self
            .interactions
            .await_response(ticket, timeout, cancel)
            .await;

        // Resume before interpreting: the waiting states always bounce
        // back through executing, whatever the outcome.
        if let Err(error) = self.set_status(session, SessionStatus::Executing) {
            return StepOutcome::Failed { error };
        }

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                warn!(session = %session.id, unit = %unit.id, error = %error, "interaction did not complete");
                return StepOutcome::Failed { error };
            }
        };

        let (accepted, value) = interpret_response(spec.kind, &response.payload);
        if !accepted {
            return StepOutcome::Failed {
                error: EngineError::UnitExecution {
                    unit: unit.id.clone(),
                    status: 1,
                    stderr: "declined by operator".to_string(),
                },
            };
        }

        if let Some(variable) = &spec.variable {
            if confirms {
                if let Err(error) = session.variables.confirm(variable, value) {
                    return StepOutcome::Failed { error };
                }
            } else if let Some(value) = value {
                session
                    .variables
                    .set(variable.clone(), value, VariableTier::InteractiveInput);
            }
        }

        StepOutcome::Completed {
            produced: HashMap::new(),
            output: None,
        }
    }

    fn set_status(
        &self,
        session: &mut ExecutionSession,
        to: SessionStatus,
    ) -> EngineResult<()> {
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

/// One resilience attempt: borrow, execute, hand back.
async fn run_on_pooled_session(
    pool: &SessionPool,
    target: &ConnectionTarget,
    command: &str,
) -> EngineResult<CommandOutput> {
    let mut borrowed = pool.acquire(target).await?;
    match borrowed.exec(command).await {
        Ok(output) => {
            pool.release(&mut borrowed).await;
            Ok(output)
        }
        Err(error) => {
            // The transport misbehaved mid-command; the session cannot be
            // trusted by the next borrower.
            pool.invalidate(&mut borrowed).await;
            Err(error)
        }
    }
}

/// Interpolate a step's string parameters against the session variables.
fn interpolate_parameters(
    step: &WorkflowStep,
    session: &ExecutionSession,
) -> HashMap<String, VariableValue> {
    step.parameters
        .iter()
        .map(|(name, value)| {
            let value = match value {
                VariableValue::String(s) => {
                    VariableValue::String(session.variables.interpolate(s))
                }
                other => other.clone(),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Scan stdout for `name=value` lines matching the unit's declared
/// produced variables.
fn parse_produced(unit: &ScriptUnit, stdout: &str) -> HashMap<String, VariableValue> {
    let mut produced = HashMap::new();
    for line in stdout.lines() {
        if let Some((name, raw)) = line.split_once('=') {
            let name = name.trim();
            if unit.produced_variables.iter().any(|p| p == name) {
                produced.insert(name.to_string(), VariableValue::parse_str(raw.trim()));
            }
        }
    }
    produced
}

/// Map an interaction payload to accept/decline plus an optional value.
fn interpret_response(kind: InteractionKind, payload: &JsonValue) -> (bool, Option<VariableValue>) {
    let (accepted, value) = match payload {
        JsonValue::Bool(b) => (*b, Some(VariableValue::Bool(*b))),
        JsonValue::String(s) => {
            let declined = matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "no" | "n" | "false" | "decline" | "cancel"
            );
            (!declined, Some(VariableValue::String(s.clone())))
        }
        JsonValue::Number(n) => (true, Some(VariableValue::Number(n.as_f64().unwrap_or(0.0)))),
        JsonValue::Null => (false, None),
        JsonValue::Object(map) => {
            let accepted = map
                .get("accepted")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            let value = map.get("value").map(VariableValue::from_json);
            (accepted, value)
        }
        JsonValue::Array(_) => (true, Some(VariableValue::from_json(payload))),
    };

    // Yes/no style answers land as booleans regardless of payload shape.
    if kind.is_confirmation() {
        (accepted, Some(VariableValue::Bool(accepted)))
    } else {
        (accepted, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit_with_products(products: &[&str]) -> ScriptUnit {
        ScriptUnit {
            id: "probe".into(),
            display_name: "Probe".into(),
            source_kind: SourceKind::StaticBuiltin,
            command: Some("probe".into()),
            interaction: None,
            required_variables: vec![],
            produced_variables: products.iter().map(|s| s.to_string()).collect(),
            parameters: vec![],
        }
    }

    #[test]
    fn parse_produced_filters_to_declared_variables() {
        let unit = unit_with_products(&["os_name", "arch"]);
        let stdout = "noise line\nos_name=linux\narch=x86_64\nsecret=shh\n";
        let produced = parse_produced(&unit, stdout);
        assert_eq!(produced.len(), 2);
        assert_eq!(
            produced["os_name"],
            VariableValue::String("linux".into())
        );
        assert!(!produced.contains_key("secret"));
    }

    #[test]
    fn parse_produced_types_values() {
        let unit = unit_with_products(&["count", "ready"]);
        let produced = parse_produced(&unit, "count=3\nready=true\n");
        assert_eq!(produced["count"], VariableValue::Number(3.0));
        assert_eq!(produced["ready"], VariableValue::Bool(true));
    }

    #[test]
    fn yes_no_answers_become_booleans() {
        let (accepted, value) = interpret_response(InteractionKind::YesNo, &json!("yes"));
        assert!(accepted);
        assert_eq!(value, Some(VariableValue::Bool(true)));

        let (accepted, value) = interpret_response(InteractionKind::YesNo, &json!("no"));
        assert!(!accepted);
        assert_eq!(value, Some(VariableValue::Bool(false)));
    }

    #[test]
    fn text_answers_keep_their_value() {
        let (accepted, value) =
            interpret_response(InteractionKind::Text, &json!("mirror.example.org"));
        assert!(accepted);
        assert_eq!(
            value,
            Some(VariableValue::String("mirror.example.org".into()))
        );
    }

    #[test]
    fn structured_answers_carry_accept_and_value() {
        let payload = json!({"accepted": true, "value": "override"});
        let (accepted, value) = interpret_response(InteractionKind::Confirmation, &payload);
        assert!(accepted);
        // Confirmation kinds normalize to a boolean.
        assert_eq!(value, Some(VariableValue::Bool(true)));

        let payload = json!({"accepted": false});
        let (accepted, _) = interpret_response(InteractionKind::Form, &payload);
        assert!(!accepted);
    }
}
