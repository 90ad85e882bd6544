//! Verification of a task's final sandbox state.
//!
//! A task's verification script runs once inside the task's sandbox; exit
//! code 0 is the only pass signal.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::sandbox::{SandboxHandle, SandboxManager};
use crate::protocol::{CommandRequest, CommandResult};
use crate::task::Task;

/// Timeout applied to verification scripts.
pub const VERIFICATION_TIMEOUT_SECS: u64 = 60;

/// Result of running a verification script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    /// Task's expected reward when passed, otherwise 0.0.
    pub reward: f64,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Failure description; absent when passed.
    pub error: Option<String>,
}

impl VerificationOutcome {
    fn from_result(result: CommandResult, expected_reward: f64) -> Self {
        let passed = result.is_success();
        let error = if passed {
            None
        } else if !result.stderr.trim().is_empty() {
            Some(result.stderr.clone())
        } else {
            Some(format!(
                "Verification failed with exit code {}",
                result.exit_code
            ))
        };

        Self {
            passed,
            reward: if passed { expected_reward } else { 0.0 },
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            error,
        }
    }
}

/// Runs verification scripts through the sandbox manager.
pub struct Verifier {
    sandboxes: Arc<SandboxManager>,
    timeout: Duration,
}

impl Verifier {
    pub fn new(sandboxes: Arc<SandboxManager>) -> Self {
        Self {
            sandboxes,
            timeout: Duration::from_secs(VERIFICATION_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the task's verification script in its working directory.
    pub async fn verify(
        &self,
        handle: &SandboxHandle,
        task: &Task,
        cancel: &CancellationToken,
    ) -> VerificationOutcome {
        let outcome = self
            .run_script(
                handle,
                &task.verification_script,
                &task.working_directory,
                task.expected_reward,
                cancel,
            )
            .await;

        info!(
            task_id = %task.id,
            passed = outcome.passed,
            exit_code = outcome.exit_code,
            "Verification finished"
        );
        outcome
    }

    /// Runs an arbitrary script in `workdir`. No retries.
    pub async fn run_script(
        &self,
        handle: &SandboxHandle,
        script: &str,
        workdir: &str,
        expected_reward: f64,
        cancel: &CancellationToken,
    ) -> VerificationOutcome {
        let request = CommandRequest::new(script)
            .with_timeout(self.timeout.as_secs())
            .with_workdir(workdir);

        debug!(sandbox = %handle.id(), workdir = workdir, "Running verification script");
        let result = self.sandboxes.exec(handle, &request, cancel).await;
        VerificationOutcome::from_result(result, expected_reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passed_outcome_carries_reward() {
        let outcome =
            VerificationOutcome::from_result(CommandResult::completed("ok\n", "", 0), 2.5);
        assert!(outcome.passed);
        assert_eq!(outcome.reward, 2.5);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_failed_outcome_uses_stderr() {
        let outcome = VerificationOutcome::from_result(
            CommandResult::completed("", "hello.txt: No such file\n", 1),
            1.0,
        );
        assert!(!outcome.passed);
        assert_eq!(outcome.reward, 0.0);
        assert_eq!(outcome.error.as_deref(), Some("hello.txt: No such file\n"));
    }

    #[test]
    fn test_failed_outcome_without_stderr() {
        let outcome = VerificationOutcome::from_result(CommandResult::completed("", "", 3), 1.0);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Verification failed with exit code 3")
        );
    }

    #[test]
    fn test_timed_out_script_fails() {
        let outcome = VerificationOutcome::from_result(
            CommandResult::timed_out(Duration::from_secs(60)),
            1.0,
        );
        assert!(!outcome.passed);
        assert!(outcome.error.unwrap().contains("timed out"));
    }
}
