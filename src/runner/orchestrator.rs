//! Top-level evaluation run.
//!
//! The [`Orchestrator`] loads the dataset, evaluates each task, feeds the
//! results to the aggregator and exposes a queryable [`RunStatus`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::evaluator::Evaluator;
use super::result::EvaluationResult;
use super::sandbox::SandboxManager;
use crate::error::RunError;
use crate::metrics::{BenchmarkReport, MetricsAggregator};
use crate::task::{Task, TaskSource};

/// Where the orchestrator currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running { current_task: Option<String> },
    Completed,
    Cancelled,
    Error(String),
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// One-line description for status queries.
    pub fn describe(&self) -> String {
        match self {
            Self::Idle => "Idle - ready to start evaluation".to_string(),
            Self::Running {
                current_task: Some(task_id),
            } => format!("Running - evaluating task {task_id}"),
            Self::Running { current_task: None } => "Running - loading tasks".to_string(),
            Self::Completed => "Completed - evaluation finished".to_string(),
            Self::Cancelled => "Cancelled - evaluation stopped early".to_string(),
            Self::Error(message) => format!("Error - {message}"),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Runs a dataset through the evaluator.
pub struct Orchestrator {
    source: Arc<dyn TaskSource>,
    evaluator: Evaluator,
    concurrency: usize,
    aggregator: Mutex<MetricsAggregator>,
    status: RwLock<RunStatus>,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn TaskSource>, evaluator: Evaluator) -> Self {
        Self {
            source,
            evaluator,
            concurrency: 1,
            aggregator: Mutex::new(MetricsAggregator::new()),
            status: RwLock::new(RunStatus::Idle),
        }
    }

    /// Number of tasks evaluated at once; results keep source order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn sandboxes(&self) -> &Arc<SandboxManager> {
        self.evaluator.sandboxes()
    }

    pub fn status(&self) -> RunStatus {
        self.status
            .read()
            .map(|status| status.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn describe(&self) -> String {
        self.status().describe()
    }

    fn set_status(&self, status: RunStatus) {
        match self.status.write() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    fn aggregator(&self) -> MutexGuard<'_, MetricsAggregator> {
        self.aggregator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Report over the results recorded so far. Safe to call mid-run.
    pub fn snapshot(&self) -> BenchmarkReport {
        self.aggregator().report()
    }

    pub fn summary(&self) -> String {
        self.aggregator().summary()
    }

    /// Evaluates every task of the source in order.
    ///
    /// Raising `cancel` stops the task in flight and skips the rest; the
    /// results already produced are still part of the report. No sandbox
    /// outlives the call.
    ///
    /// # Errors
    ///
    /// Returns `RunError::AlreadyRunning` if a run is in progress and
    /// `RunError::TaskLoad` if the dataset cannot be loaded; the status is
    /// left at `Error` in the latter case.
    pub async fn run(&self, cancel: CancellationToken) -> Result<BenchmarkReport, RunError> {
        {
            let mut status = match self.status.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if status.is_running() {
                return Err(RunError::AlreadyRunning);
            }
            *status = RunStatus::Running { current_task: None };
        }

        {
            let mut aggregator = self.aggregator();
            aggregator.reset();
            aggregator.set_dataset(self.source.name());
        }

        let tasks = match self.source.load_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(dataset = %self.source.name(), error = %e, "Failed to load tasks");
                self.set_status(RunStatus::Error(e.to_string()));
                return Err(e.into());
            }
        };

        let total = tasks.len();
        self.aggregator().set_total_tasks(total);
        info!(
            dataset = %self.source.name(),
            tasks = total,
            concurrency = self.concurrency,
            "Starting evaluation run"
        );

        let mut results = stream::iter(tasks.into_iter().enumerate())
            .map(|(index, task)| {
                let cancel = cancel.clone();
                async move { self.evaluate_one(index, total, &task, &cancel).await }.boxed()
            })
            .buffered(self.concurrency);

        while let Some(result) = results.next().await {
            if let Some(result) = result {
                self.aggregator().record(result);
            }
        }
        drop(results);

        self.sandboxes().destroy_all().await;

        let report = self.snapshot();
        if cancel.is_cancelled() {
            info!(recorded = report.total_tasks, tasks = total, "Evaluation run cancelled");
            self.set_status(RunStatus::Cancelled);
        } else {
            info!(
                passed = report.passed,
                failed = report.failed,
                pass_rate = report.pass_rate,
                "Evaluation run completed"
            );
            self.set_status(RunStatus::Completed);
        }
        Ok(report)
    }

    /// Evaluates one task unless the run was cancelled before it started.
    async fn evaluate_one(
        &self,
        index: usize,
        total: usize,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Option<EvaluationResult> {
        if cancel.is_cancelled() {
            return None;
        }
        self.set_status(RunStatus::Running {
            current_task: Some(task.id.clone()),
        });
        info!(task_id = %task.id, progress = %format!("{}/{}", index + 1, total), "Evaluating task");
        Some(self.evaluator.evaluate(task, cancel).await)
    }

    /// Destroys every sandbox still alive.
    pub async fn shutdown(&self) {
        self.sandboxes().destroy_all().await;
    }
}
