//! Per-task evaluation outcome.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MessengerError, SandboxError};

/// Error text recorded when the task wall-clock budget runs out.
pub const TASK_TIMEOUT_ERROR: &str = "Task timeout exceeded";

/// Error text recorded when a run is cancelled mid-task.
pub const CANCELLED_ERROR: &str = "Evaluation cancelled";

/// Final record of one task. Exactly one is produced per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub task_id: String,
    pub passed: bool,
    /// Expected reward when passed, otherwise 0.0.
    pub reward: f64,
    /// Number of commands the participant had executed.
    pub turns: u32,
    /// Wall-clock seconds from start of evaluation to result.
    pub total_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationResult {
    pub fn from_verdict(task_id: impl Into<String>, verdict: Verdict, elapsed: Duration) -> Self {
        Self {
            task_id: task_id.into(),
            passed: verdict.passed,
            reward: if verdict.passed { verdict.reward } else { 0.0 },
            turns: verdict.turns,
            total_time: elapsed.as_secs_f64(),
            error: verdict.error,
        }
    }

    pub fn from_failure(
        task_id: impl Into<String>,
        failure: &TaskFailure,
        turns: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            passed: false,
            reward: 0.0,
            turns,
            total_time: elapsed.as_secs_f64(),
            error: Some(failure.to_string()),
        }
    }
}

/// Outcome of a task that reached verification.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    pub reward: f64,
    pub turns: u32,
    pub error: Option<String>,
}

/// Why a task stopped before producing a verdict.
#[derive(Debug)]
pub enum TaskFailure {
    /// The sandbox could not be created or prepared.
    Provisioning(SandboxError),
    /// The participant could not be reached or answered badly.
    Messenger(MessengerError),
    /// The task wall-clock budget ran out.
    Timeout,
    Cancelled,
    /// The evaluation itself panicked.
    Internal(String),
}

impl TaskFailure {
    /// Label used for the `outcome` metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Provisioning(_) => "provisioning_error",
            Self::Messenger(_) => "messenger_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<SandboxError> for TaskFailure {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Cancelled => Self::Cancelled,
            other => Self::Provisioning(other),
        }
    }
}

impl From<MessengerError> for TaskFailure {
    fn from(err: MessengerError) -> Self {
        Self::Messenger(err)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning(e) => write!(f, "{e}"),
            Self::Messenger(e) => write!(f, "{e}"),
            Self::Timeout => f.write_str(TASK_TIMEOUT_ERROR),
            Self::Cancelled => f.write_str(CANCELLED_ERROR),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}
