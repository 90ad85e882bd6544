//! termbench: sandboxed evaluation of terminal agents.
//!
//! Tasks are handed to a participant agent one instruction at a time; the
//! commands it asks for run in isolated, resource-capped sandboxes and a
//! verification script decides whether the task was solved.

pub mod cli;
pub mod error;
pub mod execution;
pub mod handler;
pub mod messenger;
pub mod metrics;
pub mod protocol;
pub mod runner;
pub mod task;

// Re-export commonly used types
pub use error::{ConfigError, MessengerError, RunError, SandboxError, TaskLoadError};
pub use protocol::{AgentAction, CommandRequest, CommandResult};
pub use runner::{EvaluationResult, Evaluator, EvaluatorConfig, Orchestrator, SandboxManager};
pub use task::Task;
