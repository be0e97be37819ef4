//! Variable values and explicit conversions
//!
//! Coercion between string, number, and bool happens only through the
//! `to_*` methods here, at the point a typed parameter is consumed. A value
//! that does not parse yields `EngineError::Conversion` instead of silently
//! falling back.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Bool(bool),
    Number(f64),
    String(String),
    Null,
}

impl VariableValue {
    /// Parse a raw string the way shell output is read: bools and numbers
    /// when they look like one, string otherwise.
    pub fn parse_str(raw: &str) -> Self {
        match raw {
            "true" => VariableValue::Bool(true),
            "false" => VariableValue::Bool(false),
            _ => match raw.parse::<f64>() {
                Ok(n) => VariableValue::Number(n),
                Err(_) => VariableValue::String(raw.to_string()),
            },
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            VariableValue::Bool(b) => *b,
            VariableValue::Number(n) => *n != 0.0,
            VariableValue::String(s) => !s.is_empty() && s != "false" && s != "0",
            VariableValue::Null => false,
        }
    }

    pub fn to_bool(&self) -> EngineResult<bool> {
        match self {
            VariableValue::Bool(b) => Ok(*b),
            VariableValue::Number(n) => Ok(*n != 0.0),
            VariableValue::String(s) => match s.as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" | "" => Ok(false),
                _ => Err(self.conversion_error("bool")),
            },
            VariableValue::Null => Ok(false),
        }
    }

    pub fn to_number(&self) -> EngineResult<f64> {
        match self {
            VariableValue::Number(n) => Ok(*n),
            VariableValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            VariableValue::String(s) => s
                .parse::<f64>()
                .map_err(|_| self.conversion_error("number")),
            VariableValue::Null => Err(self.conversion_error("number")),
        }
    }

    /// Render for interpolation into command text.
    pub fn to_display_string(&self) -> String {
        match self {
            VariableValue::Bool(b) => b.to_string(),
            VariableValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            VariableValue::String(s) => s.clone(),
            VariableValue::Null => String::new(),
        }
    }

    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Bool(b) => VariableValue::Bool(*b),
            JsonValue::Number(n) => VariableValue::Number(n.as_f64().unwrap_or(0.0)),
            JsonValue::String(s) => VariableValue::String(s.clone()),
            JsonValue::Null => VariableValue::Null,
            other => VariableValue::String(other.to_string()),
        }
    }

    fn conversion_error(&self, target_type: &'static str) -> EngineError {
        EngineError::Conversion {
            value: self.to_display_string(),
            target_type,
        }
    }
}

impl From<&str> for VariableValue {
    fn from(s: &str) -> Self {
        VariableValue::String(s.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(s: String) -> Self {
        VariableValue::String(s)
    }
}

impl From<bool> for VariableValue {
    fn from(b: bool) -> Self {
        VariableValue::Bool(b)
    }
}

impl From<f64> for VariableValue {
    fn from(n: f64) -> Self {
        VariableValue::Number(n)
    }
}

impl From<i64> for VariableValue {
    fn from(n: i64) -> Self {
        VariableValue::Number(n as f64)
    }
}
