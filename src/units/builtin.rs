//! Built-in unit definitions
//!
//! The stock vocabulary registered at startup: enough to express the usual
//! "detect the OS, configure mirrors, install something, ask before the
//! risky part" provisioning flows. Operators add user-defined units on top.

use crate::error::EngineResult;
use crate::interact::InteractionKind;
use crate::units::{
    InteractionSpec, ParameterSpec, ParameterType, ScriptUnit, SourceKind, UnitRegistry,
};
use crate::variables::VariableValue;

/// Register the built-in unit set into a registry.
pub fn register_builtins(registry: &mut UnitRegistry) -> EngineResult<()> {
    registry.register(os_detect())?;
    registry.register(run_shell())?;
    registry.register(package_install())?;
    registry.register(confirm_proceed())?;
    Ok(())
}

/// Probe the remote OS and architecture.
fn os_detect() -> ScriptUnit {
    ScriptUnit {
        id: "os-detect".into(),
        display_name: "Detect operating system".into(),
        source_kind: SourceKind::StaticBuiltin,
        command: Some(
            "printf 'os_name=%s\\narch=%s\\n' \"$(uname -s | tr '[:upper:]' '[:lower:]')\" \"$(uname -m)\"".into(),
        ),
        interaction: None,
        required_variables: vec![],
        produced_variables: vec!["os_name".into(), "arch".into()],
        parameters: vec![],
    }
}

/// Run an arbitrary shell command on the target.
fn run_shell() -> ScriptUnit {
    ScriptUnit {
        id: "run-shell".into(),
        display_name: "Run shell command".into(),
        source_kind: SourceKind::ConfigurableBuiltin,
        command: Some("${command}".into()),
        interaction: None,
        required_variables: vec![],
        produced_variables: vec![],
        parameters: vec![ParameterSpec {
            name: "command".into(),
            param_type: ParameterType::String,
            required: true,
            default: None,
            pattern: None,
        }],
    }
}

/// Install a package with whichever package manager the target has.
fn package_install() -> ScriptUnit {
    ScriptUnit {
        id: "package-install".into(),
        display_name: "Install package".into(),
        source_kind: SourceKind::ConfigurableBuiltin,
        command: Some(
            "if command -v apt-get >/dev/null 2>&1; then \
             sudo apt-get install -y ${package}; \
             elif command -v dnf >/dev/null 2>&1; then \
             sudo dnf install -y ${package}; \
             else sudo yum install -y ${package}; fi"
                .into(),
        ),
        interaction: None,
        required_variables: vec![],
        produced_variables: vec![],
        parameters: vec![ParameterSpec {
            name: "package".into(),
            param_type: ParameterType::String,
            required: true,
            default: None,
            pattern: Some(r"^[A-Za-z0-9][A-Za-z0-9.+_-]*$".into()),
        }],
    }
}

/// Pause the run and ask whether to continue, proposing "yes".
fn confirm_proceed() -> ScriptUnit {
    ScriptUnit {
        id: "confirm-proceed".into(),
        display_name: "Confirm before continuing".into(),
        source_kind: SourceKind::InteractiveBuiltin,
        command: None,
        interaction: Some(InteractionSpec {
            kind: InteractionKind::YesNo,
            prompt: "Continue with ${workflow_name}?".into(),
            options: vec!["yes".into(), "no".into()],
            variable: Some("proceed".into()),
            suggested: Some(VariableValue::Bool(true)),
            timeout: None,
        }),
        required_variables: vec![],
        produced_variables: vec!["proceed".into()],
        parameters: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_cleanly() {
        let mut registry = UnitRegistry::new();
        register_builtins(&mut registry).unwrap();
        assert!(registry.contains("os-detect"));
        assert!(registry.contains("run-shell"));
        assert!(registry.contains("package-install"));
        assert!(registry.contains("confirm-proceed"));
    }

    #[test]
    fn os_detect_declares_its_products() {
        let mut registry = UnitRegistry::new();
        register_builtins(&mut registry).unwrap();
        let unit = registry.lookup("os-detect").unwrap();
        assert_eq!(unit.produced_variables, vec!["os_name", "arch"]);
        assert!(registry.required_parameters("os-detect").unwrap().is_empty());
    }
}
