//! Communication with the participant agent.
//!
//! The evaluator only depends on the [`Messenger`] trait. [`A2aMessenger`]
//! speaks JSON-RPC 2.0 (`tasks/send`) over HTTP.

pub mod a2a;

use async_trait::async_trait;

use crate::error::MessengerError;
use crate::protocol::{AgentAction, CommandResult, TaskInstruction};

pub use a2a::{A2aMessenger, A2A_METHOD, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Request/response channel to the agent under evaluation.
///
/// Every call is a single round trip: the participant's reply is the next
/// action for the task.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends the task instruction and returns the first action.
    async fn send_instruction(
        &self,
        instruction: &TaskInstruction,
    ) -> Result<AgentAction, MessengerError>;

    /// Reports a command result and returns the next action.
    async fn send_command_result(
        &self,
        task_id: &str,
        result: &CommandResult,
    ) -> Result<AgentAction, MessengerError>;

    /// Forgets per-task conversation state once a task is finished.
    async fn finish_task(&self, _task_id: &str) {}
}
