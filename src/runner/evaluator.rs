//! Per-task evaluation state machine.
//!
//! ```text
//! Created → InstructionSent → Looping → Verifying → Finalizing → Terminated
//!     └──────────────┴────────────┴──────────┴──→ Errored → Finalizing
//! ```
//!
//! Every path passes through `Finalizing`, which destroys the task's
//! sandbox, and ends with exactly one [`EvaluationResult`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::EvaluatorConfig;
use super::result::{EvaluationResult, TaskFailure, Verdict};
use super::sandbox::{SandboxHandle, SandboxManager};
use super::verifier::Verifier;
use crate::error::MessengerError;
use crate::messenger::Messenger;
use crate::metrics::MetricsCollector;
use crate::protocol::AgentAction;
use crate::task::Task;

/// Lifecycle states of one task evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    InstructionSent,
    Looping,
    Verifying,
    Finalizing,
    Terminated,
    Errored,
}

/// How the turn loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Completed,
    TurnsExhausted,
}

/// Mutable state local to one evaluation.
struct TaskRun<'a> {
    task: &'a Task,
    started: Instant,
    turns: u32,
    state: TaskState,
}

impl<'a> TaskRun<'a> {
    fn new(task: &'a Task) -> Self {
        let run = Self {
            task,
            started: Instant::now(),
            turns: 0,
            state: TaskState::Created,
        };
        debug!(task_id = %task.id, state = ?run.state, "Task state");
        run
    }

    fn transition(&mut self, state: TaskState) {
        debug!(task_id = %self.task.id, from = ?self.state, state = ?state, "Task state");
        self.state = state;
    }
}

/// Drives one task at a time through sandbox, participant and verifier.
///
/// The evaluator holds no per-task state, so one instance can evaluate
/// several tasks concurrently.
pub struct Evaluator {
    sandboxes: Arc<SandboxManager>,
    messenger: Arc<dyn Messenger>,
    verifier: Verifier,
    max_turns: u32,
    task_timeout: Duration,
    metrics: MetricsCollector,
}

impl Evaluator {
    pub fn new(
        sandboxes: Arc<SandboxManager>,
        messenger: Arc<dyn Messenger>,
        config: &EvaluatorConfig,
    ) -> Self {
        let verifier =
            Verifier::new(Arc::clone(&sandboxes)).with_timeout(config.verification_timeout());
        Self {
            sandboxes,
            messenger,
            verifier,
            max_turns: config.max_turns,
            task_timeout: config.task_timeout(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn sandboxes(&self) -> &Arc<SandboxManager> {
        &self.sandboxes
    }

    /// Evaluates `task` and returns its result. Never fails.
    ///
    /// Raising `cancel` interrupts the current command or participant round
    /// trip; the task is then reported as cancelled and verification is
    /// skipped.
    pub async fn evaluate(&self, task: &Task, cancel: &CancellationToken) -> EvaluationResult {
        info!(task_id = %task.id, "Starting task evaluation");

        let mut run = TaskRun::new(task);
        let mut sandbox: Option<SandboxHandle> = None;

        let outcome = AssertUnwindSafe(self.drive(&mut run, &mut sandbox, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskFailure::Internal(panic_message(panic.as_ref()))));

        if outcome.is_err() {
            run.transition(TaskState::Errored);
        }

        run.transition(TaskState::Finalizing);
        if let Some(handle) = sandbox.take() {
            self.sandboxes.destroy(&handle).await;
        }
        self.messenger.finish_task(&task.id).await;

        let elapsed = run.started.elapsed();
        let result = match outcome {
            Ok(verdict) => {
                self.metrics.record_task(
                    if verdict.passed { "passed" } else { "failed" },
                    elapsed.as_secs_f64(),
                );
                EvaluationResult::from_verdict(&task.id, verdict, elapsed)
            }
            Err(failure) => {
                error!(task_id = %task.id, turns = run.turns, error = %failure, "Task evaluation failed");
                self.metrics.record_task(failure.outcome(), elapsed.as_secs_f64());
                EvaluationResult::from_failure(&task.id, &failure, run.turns, elapsed)
            }
        };

        run.transition(TaskState::Terminated);
        info!(
            task_id = %task.id,
            passed = result.passed,
            turns = result.turns,
            elapsed_secs = result.total_time,
            "Task evaluation finished"
        );
        result
    }

    /// Steps through provisioning, the turn loop and verification.
    ///
    /// The sandbox is stored in `sandbox` as soon as it exists so the caller
    /// can destroy it on every path.
    async fn drive(
        &self,
        run: &mut TaskRun<'_>,
        sandbox: &mut Option<SandboxHandle>,
        cancel: &CancellationToken,
    ) -> Result<Verdict, TaskFailure> {
        let task = run.task;

        let handle = sandbox.insert(self.sandboxes.create(task, cancel).await?);

        let instruction = task.instruction_message();
        let action = self
            .round_trip(cancel, self.messenger.send_instruction(&instruction))
            .await?;
        run.transition(TaskState::InstructionSent);

        run.transition(TaskState::Looping);
        let exit = self.turn_loop(run, handle, action, cancel).await?;
        if exit == LoopExit::TurnsExhausted {
            warn!(task_id = %task.id, max_turns = self.max_turns, "Turn limit reached without completion");
        }

        run.transition(TaskState::Verifying);
        let outcome = self.verifier.verify(handle, task, cancel).await;
        if cancel.is_cancelled() {
            return Err(TaskFailure::Cancelled);
        }

        Ok(Verdict {
            passed: outcome.passed,
            reward: outcome.reward,
            turns: run.turns,
            error: outcome.error,
        })
    }

    async fn turn_loop(
        &self,
        run: &mut TaskRun<'_>,
        handle: &SandboxHandle,
        first: AgentAction,
        cancel: &CancellationToken,
    ) -> Result<LoopExit, TaskFailure> {
        let task = run.task;
        let mut action = first;

        while run.turns < self.max_turns {
            let request = match action {
                AgentAction::Complete { reasoning } => {
                    debug!(task_id = %task.id, turns = run.turns, reasoning = ?reasoning, "Participant completed task");
                    return Ok(LoopExit::Completed);
                }
                AgentAction::Execute { request, reasoning } => {
                    debug!(task_id = %task.id, turn = run.turns + 1, reasoning = ?reasoning, "Participant requested command");
                    request
                }
            };

            run.turns += 1;
            let result = self.sandboxes.exec(handle, &request, cancel).await;
            if cancel.is_cancelled() {
                return Err(TaskFailure::Cancelled);
            }
            debug!(
                task_id = %task.id,
                turn = run.turns,
                exit_code = result.exit_code,
                timed_out = result.timed_out,
                "Command finished"
            );

            action = self
                .round_trip(cancel, self.messenger.send_command_result(&task.id, &result))
                .await?;

            if run.started.elapsed() > self.task_timeout {
                return Err(TaskFailure::Timeout);
            }
        }

        Ok(LoopExit::TurnsExhausted)
    }

    /// Awaits one participant exchange unless `cancel` fires first.
    async fn round_trip<F>(
        &self,
        cancel: &CancellationToken,
        exchange: F,
    ) -> Result<AgentAction, TaskFailure>
    where
        F: Future<Output = Result<AgentAction, MessengerError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TaskFailure::Cancelled),
            action = exchange => Ok(action?),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task evaluation panicked".to_string()
    }
}
