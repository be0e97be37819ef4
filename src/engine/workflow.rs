//! Workflow definitions and step outcomes

use crate::error::EngineError;
use crate::variables::VariableValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a step's failure aborts the run or is merely recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Required,
    Optional,
}

/// One step of an aggregate workflow: which unit, under what condition,
/// with what parameters, and how its outputs rename downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub unit_id: String,

    /// Boolean predicate over variables; false or undefined skips the step.
    #[serde(default)]
    pub condition: Option<String>,

    #[serde(default)]
    pub parameters: HashMap<String, VariableValue>,

    /// Renames applied to produced variables after the step succeeds.
    #[serde(default)]
    pub variable_mapping: HashMap<String, String>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// A flat, ordered sequence of steps, executed top to bottom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateWorkflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

/// A workflow file as loaded by tooling: optional user-defined units plus
/// the workflow itself and its configuration-tier variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFile {
    #[serde(default)]
    pub units: Vec<crate::units::ScriptUnit>,
    pub workflow: AggregateWorkflow,
    #[serde(default)]
    pub variables: HashMap<String, VariableValue>,
}

/// Tagged result of one step evaluation. The orchestrator switches on the
/// tag; no error-based control flow crosses a suspension boundary.
#[derive(Debug)]
pub enum StepOutcome {
    Completed {
        produced: HashMap<String, VariableValue>,
        output: Option<String>,
    },
    Skipped {
        condition: String,
    },
    Failed {
        error: EngineError,
    },
}

impl StepOutcome {
    /// Apply the step's variable mapping to produced values.
    pub fn map_produced(
        produced: HashMap<String, VariableValue>,
        mapping: &HashMap<String, String>,
    ) -> HashMap<String, VariableValue> {
        produced
            .into_iter()
            .map(|(name, value)| match mapping.get(&name) {
                Some(renamed) => (renamed.clone(), value),
                None => (name, value),
            })
            .collect()
    }
}
