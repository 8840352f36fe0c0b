//! Workflow engine: the per-ticket state machine and the poll loop around it.

mod config;
mod runner;
mod types;

pub use config::{EngineConfig, TimeoutConfig};
pub use runner::{Collaborators, WorkflowEngine};
pub use types::{
    AlertTarget, EngineError, EngineStatus, ErrorKind, FailureEvent, PollSummary, Stage,
};
