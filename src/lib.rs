//! # Rigger
//!
//! Resilient remote provisioning workflows: define multi-step flows
//! ("detect OS, configure mirrors, install Docker, confirm the risky
//! part"), run them against remote hosts over a managed pool of
//! authenticated sessions, and survive flaky connections without babysitting.
//!
//! ## Modules
//!
//! - `remote` - connection targets, the transport seam, and the keyed
//!   session pool
//! - `resilience` - retry with backoff composed with per-target circuit
//!   breakers
//! - `variables` - six-tier scoped variable resolution and interpolation
//! - `condition` - boolean step-gating expressions over variables
//! - `units` - atomic unit definitions, validation, and the registry
//! - `interact` - correlation-id matched suspend/resume for human input
//! - `engine` - the orchestrator, per-step executor, sessions, and events
//! - `config` - engine configuration with serde defaults
//! - `cli` - the `rigger` command-line runner

pub mod cli;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod interact;
pub mod remote;
pub mod resilience;
pub mod units;
pub mod variables;

pub use config::EngineConfig;
pub use engine::Orchestrator;
pub use error::{EngineError, EngineResult};
