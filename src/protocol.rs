//! Message types exchanged between the evaluator and the participant agent.
//!
//! These are schema types only; how they travel is up to the
//! [`Messenger`](crate::messenger::Messenger) implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MessengerError;

/// Timeout applied to a command when the participant does not specify one.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Exit code reserved for "not executed" and infrastructure failures.
pub const EXIT_CODE_NOT_EXECUTED: i64 = -1;

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

/// A shell command the participant wants run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Shell source, executed with `/bin/sh -c`.
    pub command: String,
    /// Timeout in seconds.
    #[serde(default = "default_command_timeout")]
    pub timeout: u64,
    /// Working directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

impl CommandRequest {
    /// Creates a request with the default timeout and no workdir override.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
            workdir: None,
        }
    }

    /// Sets the timeout in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    /// Sets the working directory override.
    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Outcome of one command executed inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Process exit code, or [`EXIT_CODE_NOT_EXECUTED`].
    pub exit_code: i64,
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandResult {
    /// A command that ran to completion.
    pub fn completed(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            timed_out: false,
        }
    }

    /// A command that was terminated after exceeding its timeout.
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Command timed out after {}s", timeout.as_secs()),
            exit_code: EXIT_CODE_NOT_EXECUTED,
            timed_out: true,
        }
    }

    /// A command that could not be executed at all.
    pub fn not_executed(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: EXIT_CODE_NOT_EXECUTED,
            timed_out: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// What the participant wants to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentAction {
    /// Run a command in the sandbox and report the result back.
    Execute {
        request: CommandRequest,
        reasoning: Option<String>,
    },
    /// The participant considers the task done.
    Complete { reasoning: Option<String> },
}

impl AgentAction {
    pub fn execute(request: CommandRequest) -> Self {
        Self::Execute {
            request,
            reasoning: None,
        }
    }

    pub fn complete() -> Self {
        Self::Complete { reasoning: None }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            Self::Execute { reasoning, .. } | Self::Complete { reasoning } => reasoning.as_deref(),
        }
    }
}

/// Discriminator of an [`AgentResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Execute,
    Complete,
}

/// Wire form of an [`AgentAction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub action: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl TryFrom<AgentResponse> for AgentAction {
    type Error = MessengerError;

    fn try_from(response: AgentResponse) -> Result<Self, Self::Error> {
        match response.action {
            ActionType::Complete => Ok(AgentAction::Complete {
                reasoning: response.reasoning,
            }),
            ActionType::Execute => {
                let request = response.command.ok_or_else(|| {
                    MessengerError::Protocol(
                        "action 'execute' requires a 'command' object".to_string(),
                    )
                })?;
                Ok(AgentAction::Execute {
                    request,
                    reasoning: response.reasoning,
                })
            }
        }
    }
}

impl From<AgentAction> for AgentResponse {
    fn from(action: AgentAction) -> Self {
        match action {
            AgentAction::Execute { request, reasoning } => Self {
                action: ActionType::Execute,
                command: Some(request),
                reasoning,
            },
            AgentAction::Complete { reasoning } => Self {
                action: ActionType::Complete,
                command: None,
                reasoning,
            },
        }
    }
}

/// Execution context sent alongside an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub working_directory: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// First message of a task conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstruction {
    pub task_id: String,
    pub instruction: String,
    pub context: TaskContext,
}

/// Command result as reported to the participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResultMessage {
    pub task_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
}

impl CommandResultMessage {
    pub fn new(task_id: impl Into<String>, result: &CommandResult) -> Self {
        Self {
            task_id: task_id.into(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
        }
    }
}

/// Payload carried to the participant, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParticipantMessage {
    TaskInstruction(TaskInstruction),
    CommandResult(CommandResultMessage),
}

impl ParticipantMessage {
    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskInstruction(m) => &m.task_id,
            Self::CommandResult(m) => &m.task_id,
        }
    }
}
