//! Atomic provisioning units
//!
//! A [`ScriptUnit`] is one indivisible remote action with a declared
//! parameter and variable contract. Definitions are immutable once loaded
//! into the registry; which execution path runs a unit is decided by its
//! [`SourceKind`].

pub mod builtin;
pub mod registry;

pub use registry::UnitRegistry;

use crate::error::{EngineError, EngineResult};
use crate::interact::InteractionKind;
use crate::variables::VariableValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Where a unit definition comes from, and therefore how it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Fixed command, no parameters.
    StaticBuiltin,
    /// Built-in command template, parameterized.
    ConfigurableBuiltin,
    /// Built-in that suspends the run for a human decision.
    InteractiveBuiltin,
    /// Operator-supplied command template.
    UserDefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Bool,
}

/// One declared parameter of a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,

    #[serde(rename = "type", default)]
    pub param_type: ParameterType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<VariableValue>,

    /// Regex the rendered value must match.
    #[serde(default)]
    pub pattern: Option<String>,
}

/// The interactive contract of an interactive-builtin unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionSpec {
    pub kind: InteractionKind,

    /// Prompt template, interpolated against the variable context.
    pub prompt: String,

    #[serde(default)]
    pub options: Vec<String>,

    /// Variable the answer lands in.
    #[serde(default)]
    pub variable: Option<String>,

    /// Proposed value subject to human override. Presence turns the
    /// interaction into a pending confirmation.
    #[serde(default)]
    pub suggested: Option<VariableValue>,

    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// An atomic unit definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptUnit {
    pub id: String,

    pub display_name: String,

    pub source_kind: SourceKind,

    /// Command template for command-backed kinds.
    #[serde(default)]
    pub command: Option<String>,

    /// Interaction contract for interactive kinds.
    #[serde(default)]
    pub interaction: Option<InteractionSpec>,

    /// Variables that must resolve before the unit may run.
    #[serde(default)]
    pub required_variables: Vec<String>,

    /// Variables the unit declares it will produce on success.
    #[serde(default)]
    pub produced_variables: Vec<String>,

    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl ScriptUnit {
    /// Check the definition's internal contract. Called at registration.
    pub fn validate_definition(&self) -> EngineResult<()> {
        match self.source_kind {
            SourceKind::StaticBuiltin => {
                if self.command.is_none() {
                    return Err(EngineError::Validation(format!(
                        "static unit '{}' has no command",
                        self.id
                    )));
                }
                if self.parameters.iter().any(|p| p.required) {
                    return Err(EngineError::Validation(format!(
                        "static unit '{}' must not require parameters",
                        self.id
                    )));
                }
            }
            SourceKind::ConfigurableBuiltin | SourceKind::UserDefined => {
                if self.command.is_none() {
                    return Err(EngineError::Validation(format!(
                        "unit '{}' has no command",
                        self.id
                    )));
                }
            }
            SourceKind::InteractiveBuiltin => {
                if self.interaction.is_none() {
                    return Err(EngineError::Validation(format!(
                        "interactive unit '{}' has no interaction contract",
                        self.id
                    )));
                }
            }
        }

        for param in &self.parameters {
            if let Some(pattern) = &param.pattern {
                Regex::new(pattern).map_err(|e| {
                    EngineError::Validation(format!(
                        "unit '{}' parameter '{}' has invalid pattern: {e}",
                        self.id, param.name
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Validate supplied parameter values against the declared contract,
    /// applying defaults and type conversions. Returns the effective
    /// parameter map used for command generation.
    pub fn validate_parameters(
        &self,
        supplied: &HashMap<String, VariableValue>,
    ) -> EngineResult<HashMap<String, VariableValue>> {
        let mut effective = HashMap::new();

        for spec in &self.parameters {
            let value = match supplied.get(&spec.name) {
                Some(value) => value.clone(),
                None => match &spec.default {
                    Some(default) => default.clone(),
                    None if spec.required => {
                        return Err(EngineError::Validation(format!(
                            "unit '{}' requires parameter '{}'",
                            self.id, spec.name
                        )))
                    }
                    None => continue,
                },
            };

            let typed = match spec.param_type {
                ParameterType::String => VariableValue::String(value.to_display_string()),
                ParameterType::Number => VariableValue::Number(value.to_number()?),
                ParameterType::Bool => VariableValue::Bool(value.to_bool()?),
            };

            if let Some(pattern) = &spec.pattern {
                let re = Regex::new(pattern).map_err(|e| {
                    EngineError::Validation(format!("invalid pattern for '{}': {e}", spec.name))
                })?;
                let rendered = typed.to_display_string();
                if !re.is_match(&rendered) {
                    return Err(EngineError::Validation(format!(
                        "parameter '{}' value '{rendered}' does not match pattern '{pattern}'",
                        spec.name
                    )));
                }
            }

            effective.insert(spec.name.clone(), typed);
        }

        // Unknown parameters are rejected rather than silently dropped.
        for name in supplied.keys() {
            if !self.parameters.iter().any(|p| &p.name == name) {
                return Err(EngineError::Validation(format!(
                    "unit '{}' does not declare parameter '{name}'",
                    self.id
                )));
            }
        }

        Ok(effective)
    }
}
