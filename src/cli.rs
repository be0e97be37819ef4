//! CLI argument parsing and command dispatch

use crate::config::EngineConfig;
use crate::engine::{ChannelSink, ExecutionEvent, Orchestrator, SessionStatus, WorkflowFile};
use crate::error::EngineError;
use crate::remote::{ConnectionTarget, Secret, SshTransport};
use crate::units::{builtin, UnitRegistry};
use crate::variables::VariableValue;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Run provisioning workflows against remote hosts
#[derive(Parser)]
#[command(name = "rigger")]
#[command(about = "Resilient remote provisioning workflows", long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow file against a remote target
    Run {
        /// Path to the workflow YAML file
        workflow: PathBuf,

        /// Remote host to provision
        #[arg(long)]
        host: String,

        /// SSH port
        #[arg(long, default_value = "22")]
        port: u16,

        /// Remote username
        #[arg(long)]
        user: String,

        /// Private key file (mutually exclusive with --password)
        #[arg(long)]
        key: Option<PathBuf>,

        /// Password (prefer --key; requires sshpass)
        #[arg(long)]
        password: Option<String>,

        /// Initial variables as name=value, repeatable
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Engine configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },

    /// List registered units
    Units,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            workflow,
            host,
            port,
            user,
            key,
            password,
            vars,
            config,
        } => {
            run_workflow(workflow, host, port, user, key, password, vars, config).await
        }
        Commands::Units => list_units(),
    }
}

fn list_units() -> Result<()> {
    let mut registry = UnitRegistry::new();
    builtin::register_builtins(&mut registry)?;
    for unit in registry.units() {
        println!("{:<20} {:?}  {}", unit.id, unit.source_kind, unit.display_name);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_workflow(
    workflow_path: PathBuf,
    host: String,
    port: u16,
    user: String,
    key: Option<PathBuf>,
    password: Option<String>,
    vars: Vec<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let secret = match (key, password) {
        (Some(path), None) => Secret::KeyFile(path),
        (None, Some(password)) => Secret::Password(password),
        (Some(_), Some(_)) => bail!("--key and --password are mutually exclusive"),
        (None, None) => bail!("one of --key or --password is required"),
    };

    let config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_yaml::from_str::<EngineConfig>(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    let raw = std::fs::read_to_string(&workflow_path)
        .with_context(|| format!("reading workflow {}", workflow_path.display()))?;
    let file: WorkflowFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing workflow {}", workflow_path.display()))?;

    let mut registry = UnitRegistry::new();
    builtin::register_builtins(&mut registry)?;
    for unit in file.units {
        registry.register(unit)?;
    }

    let mut initial = file.variables;
    for pair in vars {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| EngineError::Validation(format!("--var '{pair}' is not name=value")))?;
        initial.insert(name.to_string(), VariableValue::parse_str(value));
    }

    let target = ConnectionTarget {
        host,
        port,
        username: user,
        secret,
        connect_timeout: Duration::from_secs(10),
        execute_timeout: Duration::from_secs(120),
    };

    let (sink, mut events) = ChannelSink::new();
    let orchestrator = Orchestrator::new(config, registry, Arc::new(SshTransport), Arc::new(sink));

    let session_id = orchestrator.start_workflow(file.workflow, initial, target)?;

    // Surface events as they arrive and answer interaction requests from
    // the terminal.
    let event_loop = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let mut stdin = BufReader::new(tokio::io::stdin()).lines();
            while let Some(event) = events.recv().await {
                render_event(&event);
                if let ExecutionEvent::InteractionRequested { request, .. } = &event {
                    println!("> {}", request.prompt);
                    if !request.options.is_empty() {
                        println!("  options: {}", request.options.join(", "));
                    }
                    if let Ok(Some(line)) = stdin.next_line().await {
                        let answer = line.trim().to_string();
                        if let Err(e) = orchestrator.submit_interaction_response(
                            &request.correlation_id,
                            serde_json::Value::String(answer),
                        ) {
                            debug!(error = %e, "interaction response not accepted");
                        }
                    }
                }
            }
        })
    };

    let session = orchestrator.wait(session_id).await?;
    event_loop.abort();

    println!();
    println!(
        "session {} finished: {:?} ({} skipped, {} failed)",
        session.id,
        session.status(),
        session.skipped_steps.len(),
        session.failed_steps.len()
    );

    if session.status() != SessionStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn render_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::SessionStarted {
            workflow,
            total_steps,
            ..
        } => println!("starting '{workflow}' ({total_steps} steps)"),
        ExecutionEvent::StepStarted {
            step_index,
            unit_id,
            ..
        } => println!("[{step_index}] {unit_id} ..."),
        ExecutionEvent::StepCompleted {
            step_index,
            unit_id,
            ..
        } => println!("[{step_index}] {unit_id} ok"),
        ExecutionEvent::StepSkipped {
            step_index,
            unit_id,
            condition,
            ..
        } => println!("[{step_index}] {unit_id} skipped ({condition})"),
        ExecutionEvent::StepFailed {
            step_index,
            unit_id,
            error,
            fatal,
            ..
        } => {
            let marker = if *fatal { "failed" } else { "failed (continuing)" };
            println!("[{step_index}] {unit_id} {marker}: {error}");
        }
        _ => {}
    }
}
