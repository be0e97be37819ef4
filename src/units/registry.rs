//! Unit registry
//!
//! Explicitly constructed and owned by the orchestrator; passed by handle
//! to everything that needs lookups. No process-global state.

use crate::error::{EngineError, EngineResult};
use crate::units::{ParameterSpec, ScriptUnit};
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
pub struct UnitRegistry {
    units: HashMap<String, ScriptUnit>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit definition. Rejects duplicates and definitions that
    /// break their source-kind contract.
    pub fn register(&mut self, unit: ScriptUnit) -> EngineResult<()> {
        unit.validate_definition()?;
        if self.units.contains_key(&unit.id) {
            return Err(EngineError::Validation(format!(
                "unit '{}' is already registered",
                unit.id
            )));
        }
        debug!(unit = %unit.id, kind = ?unit.source_kind, "registered unit");
        self.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> EngineResult<&ScriptUnit> {
        self.units
            .get(id)
            .ok_or_else(|| EngineError::UnitNotFound(id.to_string()))
    }

    pub fn required_parameters(&self, id: &str) -> EngineResult<Vec<&ParameterSpec>> {
        Ok(self
            .lookup(id)?
            .parameters
            .iter()
            .filter(|p| p.required)
            .collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// All registered units, sorted by id for stable listings.
    pub fn units(&self) -> Vec<&ScriptUnit> {
        let mut units: Vec<&ScriptUnit> = self.units.values().collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        units
    }
}
