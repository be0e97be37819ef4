//! Scoped variable resolution
//!
//! Six tiers with a fixed precedence order mediate between live user input,
//! confirmed choices, proposed defaults, configuration, values produced by
//! earlier steps, and system facts. `resolve` walks the tiers uniformly and
//! returns the first value present; no call site special-cases a tier.

pub mod interpolate;
pub mod value;

pub use value::VariableValue;

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One precedence level. Declaration order is precedence order, highest
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableTier {
    /// Supplied by a human through an interaction response.
    InteractiveInput,
    /// A proposed value the user explicitly accepted or overrode.
    UserConfirmed,
    /// The suggested value of a pending confirmation, visible until decided.
    SuggestedDefault,
    /// Supplied with the workflow submission or from configuration.
    Configuration,
    /// Written by earlier steps of the run.
    RuntimeProduced,
    /// Environment and target facts seeded at session start.
    SystemFact,
}

impl VariableTier {
    pub const PRECEDENCE: [VariableTier; 6] = [
        VariableTier::InteractiveInput,
        VariableTier::UserConfirmed,
        VariableTier::SuggestedDefault,
        VariableTier::Configuration,
        VariableTier::RuntimeProduced,
        VariableTier::SystemFact,
    ];
}

/// A proposed variable value awaiting explicit human accept or override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub variable: String,
    pub suggested: VariableValue,
    pub reason: String,
    #[serde(default)]
    pub trigger_condition: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub user_choice: Option<VariableValue>,
}

/// The scoped variable store for one execution session.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    tiers: HashMap<VariableTier, HashMap<String, VariableValue>>,
    pending: HashMap<String, PendingConfirmation>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the tiers in precedence order and return the first value present.
    pub fn resolve(&self, name: &str) -> Option<&VariableValue> {
        for tier in VariableTier::PRECEDENCE {
            if let Some(value) = self.tiers.get(&tier).and_then(|m| m.get(name)) {
                return Some(value);
            }
        }
        None
    }

    /// Read from one specific tier only.
    pub fn get(&self, name: &str, tier: VariableTier) -> Option<&VariableValue> {
        self.tiers.get(&tier).and_then(|m| m.get(name))
    }

    pub fn set(&mut self, name: impl Into<String>, value: VariableValue, tier: VariableTier) {
        self.tiers
            .entry(tier)
            .or_default()
            .insert(name.into(), value);
    }

    /// Merge a batch of values into one tier.
    pub fn merge(&mut self, values: HashMap<String, VariableValue>, tier: VariableTier) {
        let map = self.tiers.entry(tier).or_default();
        for (name, value) in values {
            map.insert(name, value);
        }
    }

    /// Remove a name from every tier. Values never expire on their own;
    /// this is the only way one disappears.
    pub fn clear(&mut self, name: &str) {
        for map in self.tiers.values_mut() {
            map.remove(name);
        }
        self.pending.remove(name);
    }

    /// Propose a value for human confirmation. The suggestion becomes
    /// visible at the suggested-default tier until decided.
    pub fn propose_confirmation(
        &mut self,
        variable: impl Into<String>,
        suggested: VariableValue,
        reason: impl Into<String>,
        trigger_condition: Option<String>,
    ) {
        let variable = variable.into();
        self.set(
            variable.clone(),
            suggested.clone(),
            VariableTier::SuggestedDefault,
        );
        self.pending.insert(
            variable.clone(),
            PendingConfirmation {
                variable,
                suggested,
                reason: reason.into(),
                trigger_condition,
                confirmed: false,
                user_choice: None,
            },
        );
    }

    /// Record the human decision for a pending confirmation. `choice` of
    /// `None` accepts the suggestion as-is.
    pub fn confirm(
        &mut self,
        variable: &str,
        choice: Option<VariableValue>,
    ) -> EngineResult<()> {
        let pending = self.pending.get_mut(variable).ok_or_else(|| {
            EngineError::Validation(format!("no pending confirmation for '{variable}'"))
        })?;
        let value = choice.clone().unwrap_or_else(|| pending.suggested.clone());
        pending.confirmed = true;
        pending.user_choice = choice;
        self.set(variable.to_string(), value, VariableTier::UserConfirmed);
        Ok(())
    }

    pub fn pending_confirmations(&self) -> impl Iterator<Item = &PendingConfirmation> {
        self.pending.values()
    }

    /// Snapshot of every resolvable name with its winning value.
    pub fn flatten(&self) -> HashMap<String, VariableValue> {
        let mut out = HashMap::new();
        // Walk lowest precedence first so higher tiers overwrite.
        for tier in VariableTier::PRECEDENCE.iter().rev() {
            if let Some(map) = self.tiers.get(tier) {
                for (name, value) in map {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
        out
    }
}
