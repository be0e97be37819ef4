//! Shared fixtures for integration tests
#![allow(dead_code)]

use rigger::config::{EngineConfig, PoolConfig};
use rigger::engine::{CollectingSink, EventSink, Orchestrator};
use rigger::interact::InteractionKind;
use rigger::remote::{ConnectionTarget, MockTransport, Secret};
use rigger::units::{
    builtin, InteractionSpec, ParameterSpec, ParameterType, ScriptUnit, SourceKind, UnitRegistry,
};
use rigger::variables::VariableValue;
use std::sync::Arc;
use std::time::Duration;

pub fn target() -> ConnectionTarget {
    ConnectionTarget {
        host: "test-host".into(),
        port: 22,
        username: "root".into(),
        secret: Secret::Password("secret".into()),
        connect_timeout: Duration::from_secs(1),
        execute_timeout: Duration::from_secs(1),
    }
}

/// Fast-feedback engine config for tests.
pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.pool = PoolConfig {
        max_size: 2,
        borrow_timeout: Duration::from_millis(200),
        ..PoolConfig::default()
    };
    config.retry.initial_backoff = Duration::from_millis(5);
    config.interaction_timeout = Duration::from_secs(5);
    config
}

/// A user-defined unit that runs `command` and declares `produced`.
pub fn command_unit(id: &str, command: &str, produced: &[&str]) -> ScriptUnit {
    ScriptUnit {
        id: id.into(),
        display_name: id.into(),
        source_kind: SourceKind::UserDefined,
        command: Some(command.into()),
        interaction: None,
        required_variables: vec![],
        produced_variables: produced.iter().map(|s| s.to_string()).collect(),
        parameters: vec![],
    }
}

/// A yes/no interactive unit proposing `true` for `variable`.
pub fn confirm_unit(id: &str, variable: &str, timeout: Option<Duration>) -> ScriptUnit {
    ScriptUnit {
        id: id.into(),
        display_name: id.into(),
        source_kind: SourceKind::InteractiveBuiltin,
        command: None,
        interaction: Some(InteractionSpec {
            kind: InteractionKind::YesNo,
            prompt: format!("Proceed with {id}?"),
            options: vec!["yes".into(), "no".into()],
            variable: Some(variable.into()),
            suggested: Some(VariableValue::Bool(true)),
            timeout,
        }),
        required_variables: vec![],
        produced_variables: vec![variable.into()],
        parameters: vec![],
    }
}

/// A configurable unit with one required string parameter feeding the
/// command template.
pub fn parameterized_unit(id: &str, template: &str, parameter: &str) -> ScriptUnit {
    ScriptUnit {
        id: id.into(),
        display_name: id.into(),
        source_kind: SourceKind::ConfigurableBuiltin,
        command: Some(template.into()),
        interaction: None,
        required_variables: vec![],
        produced_variables: vec![],
        parameters: vec![ParameterSpec {
            name: parameter.into(),
            param_type: ParameterType::String,
            required: true,
            default: None,
            pattern: None,
        }],
    }
}

/// Build an orchestrator around a mock transport and collecting sink.
pub fn harness(
    config: EngineConfig,
    units: Vec<ScriptUnit>,
) -> (Arc<Orchestrator>, MockTransport, Arc<CollectingSink>) {
    let transport = MockTransport::new();
    let sink = Arc::new(CollectingSink::new());

    let mut registry = UnitRegistry::new();
    builtin::register_builtins(&mut registry).unwrap();
    for unit in units {
        registry.register(unit).unwrap();
    }

    let orchestrator = Orchestrator::new(
        config,
        registry,
        Arc::new(transport.clone()),
        Arc::clone(&sink) as Arc<dyn EventSink>,
    );
    (orchestrator, transport, sink)
}
