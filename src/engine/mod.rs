//! Execution engine
//!
//! The orchestrator, the per-step executor, session state, workflow
//! definitions, and the event stream boundary.

pub mod event;
pub mod executor;
pub mod orchestrator;
pub mod session;
pub mod workflow;

pub use event::{ChannelSink, CollectingSink, EventSink, ExecutionEvent, TracingSink};
pub use orchestrator::Orchestrator;
pub use session::{ExecutionSession, SessionStatus};
pub use workflow::{AggregateWorkflow, FailurePolicy, StepOutcome, WorkflowFile, WorkflowStep};
