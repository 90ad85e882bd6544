//! Sandbox lifecycle management.
//!
//! [`SandboxManager`] owns a [`SandboxRegistry`] of live sandboxes and turns
//! runtime calls into the guarantees the evaluator relies on: commands are
//! bounded by their timeout and killed when it expires, and destruction is
//! idempotent and never fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SandboxError;
use crate::execution::{ExecOutput, ExecSpec, SandboxLimits, SandboxRuntime, SandboxSpec};
use crate::metrics::MetricsCollector;
use crate::protocol::{CommandRequest, CommandResult};
use crate::task::Task;

/// Prefix of every sandbox name handed to the runtime.
pub const SANDBOX_NAME_PREFIX: &str = "termbench";

/// Label carrying the task id on each sandbox.
pub const TASK_LABEL: &str = "termbench.task";

/// Opaque sandbox identifier, unique per manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxId(String);

impl SandboxId {
    fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to one sandbox, owned by the task that created it.
///
/// Deliberately not `Clone`: a handle belongs to exactly one task.
#[derive(Debug, PartialEq, Eq)]
pub struct SandboxHandle {
    id: SandboxId,
    task_id: String,
    working_dir: String,
}

impl SandboxHandle {
    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }
}

/// Bookkeeping for one live sandbox.
#[derive(Debug, Clone)]
pub struct SandboxEntry {
    /// Identifier assigned by the runtime.
    pub runtime_id: String,
    pub task_id: String,
    pub created_at: DateTime<Utc>,
}

/// Live sandboxes keyed by id.
///
/// All operations take the lock for the duration of a single map access, so
/// a sandbox is removed by exactly one `take` even under concurrent destroys.
#[derive(Debug, Default)]
pub struct SandboxRegistry {
    entries: Mutex<HashMap<SandboxId, SandboxEntry>>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SandboxId, SandboxEntry>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, id: SandboxId, entry: SandboxEntry) {
        self.lock().insert(id, entry);
    }

    pub fn runtime_id(&self, id: &SandboxId) -> Option<String> {
        self.lock().get(id).map(|entry| entry.runtime_id.clone())
    }

    /// Removes and returns the entry; `None` if it was already gone.
    pub fn take(&self, id: &SandboxId) -> Option<SandboxEntry> {
        self.lock().remove(id)
    }

    /// Live entries, oldest first.
    pub fn entries(&self) -> Vec<(SandboxId, SandboxEntry)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        entries.sort_by_key(|(_, entry)| entry.created_at);
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Creates, drives and destroys sandboxes on a [`SandboxRuntime`].
pub struct SandboxManager {
    runtime: Arc<dyn SandboxRuntime>,
    registry: SandboxRegistry,
    limits: SandboxLimits,
    stop_grace: Duration,
    setup_timeout: Duration,
    metrics: MetricsCollector,
}

enum ExecWait {
    Finished(Result<ExecOutput, SandboxError>),
    TimedOut,
    Cancelled,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            runtime,
            registry: SandboxRegistry::new(),
            limits: SandboxLimits::default(),
            stop_grace: Duration::from_secs(5),
            setup_timeout: Duration::from_secs(30),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Number of sandboxes not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    /// Sandboxes not yet destroyed, oldest first.
    pub fn live_sandboxes(&self) -> Vec<SandboxEntry> {
        self.registry
            .entries()
            .into_iter()
            .map(|(_, entry)| entry)
            .collect()
    }

    /// Provisions a ready sandbox for `task`.
    ///
    /// Setup commands run in order; their exit status is logged but does not
    /// fail creation. On any error the partially built sandbox is destroyed
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error for image, create or start failures, and
    /// `SandboxError::Cancelled` if `cancel` fires during provisioning.
    pub async fn create(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<SandboxHandle, SandboxError> {
        self.runtime.ensure_image(&task.image).await?;
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let id = SandboxId::generate();
        let spec = SandboxSpec::new(format!("{SANDBOX_NAME_PREFIX}-{id}"), &task.image)
            .with_working_dir(&task.working_directory)
            .with_env(task.environment.clone())
            .with_limits(self.limits.clone())
            .with_label(TASK_LABEL, &task.id);

        let runtime_id = self.runtime.create(&spec).await?;
        self.registry.insert(
            id.clone(),
            SandboxEntry {
                runtime_id: runtime_id.clone(),
                task_id: task.id.clone(),
                created_at: Utc::now(),
            },
        );
        self.metrics.sandbox_created();

        let handle = SandboxHandle {
            id,
            task_id: task.id.clone(),
            working_dir: task.working_directory.clone(),
        };

        if let Err(e) = self.prepare(&handle, &runtime_id, task, cancel).await {
            warn!(task_id = %task.id, sandbox = %handle.id, error = %e, "Sandbox preparation failed");
            self.destroy(&handle).await;
            return Err(e);
        }

        info!(
            task_id = %task.id,
            sandbox = %handle.id,
            image = %task.image,
            "Sandbox ready"
        );
        Ok(handle)
    }

    async fn prepare(
        &self,
        handle: &SandboxHandle,
        runtime_id: &str,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<(), SandboxError> {
        self.runtime.start(runtime_id).await?;

        for (index, command) in task.setup_commands.iter().enumerate() {
            let request = CommandRequest {
                command: command.clone(),
                timeout: self.setup_timeout.as_secs(),
                workdir: None,
            };
            let result = self.exec(handle, &request, cancel).await;
            if cancel.is_cancelled() {
                return Err(SandboxError::Cancelled);
            }
            if result.is_success() {
                debug!(task_id = %task.id, step = index, "Setup command succeeded");
            } else {
                warn!(
                    task_id = %task.id,
                    step = index,
                    exit_code = result.exit_code,
                    timed_out = result.timed_out,
                    "Setup command failed, continuing"
                );
            }
        }
        Ok(())
    }

    /// Runs `request` inside the sandbox.
    ///
    /// Never fails: a timeout yields a timed-out result after the process
    /// tree has been killed, and infrastructure failures (including an
    /// unknown handle) yield exit code -1 with a description in stderr.
    pub async fn exec(
        &self,
        handle: &SandboxHandle,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let Some(runtime_id) = self.registry.runtime_id(&handle.id) else {
            return CommandResult::not_executed(
                SandboxError::NotFound {
                    id: handle.id.to_string(),
                }
                .to_string(),
            );
        };

        let timeout = request.timeout_duration();
        let exec = ExecSpec {
            exec_id: Uuid::new_v4().simple().to_string(),
            command: request.command.clone(),
            workdir: request.workdir.clone(),
        };

        debug!(sandbox = %handle.id, command = %exec.command, timeout_secs = timeout.as_secs(), "Executing command");

        let wait = {
            let run = tokio::time::timeout(timeout, self.runtime.exec(&runtime_id, &exec));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => ExecWait::Cancelled,
                outcome = run => match outcome {
                    Ok(result) => ExecWait::Finished(result),
                    Err(_) => ExecWait::TimedOut,
                },
            }
        };

        let result = match wait {
            ExecWait::Finished(Ok(output)) => {
                CommandResult::completed(output.stdout, output.stderr, output.exit_code)
            }
            ExecWait::Finished(Err(SandboxError::NotFound { .. })) => {
                CommandResult::not_executed(
                    SandboxError::NotFound {
                        id: handle.id.to_string(),
                    }
                    .to_string(),
                )
            }
            ExecWait::Finished(Err(e)) => CommandResult::not_executed(e.to_string()),
            ExecWait::TimedOut => {
                warn!(sandbox = %handle.id, timeout_secs = timeout.as_secs(), "Command timed out, terminating");
                self.terminate(&runtime_id, &exec.exec_id).await;
                CommandResult::timed_out(timeout)
            }
            ExecWait::Cancelled => {
                self.terminate(&runtime_id, &exec.exec_id).await;
                CommandResult::not_executed("Command cancelled")
            }
        };

        self.metrics.record_command(&result);
        result
    }

    async fn terminate(&self, runtime_id: &str, exec_id: &str) {
        if let Err(e) = self.runtime.terminate_exec(runtime_id, exec_id).await {
            warn!(sandbox = runtime_id, exec_id = exec_id, error = %e, "Failed to terminate command");
        }
    }

    /// Stops and removes the sandbox. Unknown or already destroyed handles
    /// are ignored; runtime failures are logged.
    pub async fn destroy(&self, handle: &SandboxHandle) {
        self.destroy_id(&handle.id).await;
    }

    async fn destroy_id(&self, id: &SandboxId) {
        let Some(entry) = self.registry.take(id) else {
            debug!(sandbox = %id, "Sandbox already destroyed");
            return;
        };
        self.metrics.sandbox_destroyed();
        let age_secs = (Utc::now() - entry.created_at).num_milliseconds() as f64 / 1000.0;

        match self.runtime.stop(&entry.runtime_id, self.stop_grace).await {
            Ok(()) | Err(SandboxError::NotFound { .. }) => {}
            Err(e) => warn!(sandbox = %id, error = %e, "Graceful stop failed, forcing removal"),
        }

        match self.runtime.remove(&entry.runtime_id).await {
            Ok(()) | Err(SandboxError::NotFound { .. }) => {
                info!(sandbox = %id, task_id = %entry.task_id, age_secs, "Sandbox destroyed");
            }
            Err(e) => warn!(sandbox = %id, error = %e, "Failed to remove sandbox"),
        }
    }

    /// Destroys every sandbox still tracked.
    pub async fn destroy_all(&self) {
        let entries = self.registry.entries();
        if let Some((_, oldest)) = entries.first() {
            info!(
                count = entries.len(),
                oldest_task = %oldest.task_id,
                oldest_created_at = %oldest.created_at,
                "Destroying remaining sandboxes"
            );
        }
        for (id, _) in entries {
            self.destroy_id(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingRuntime {
        calls: Mutex<Vec<String>>,
        fail_start: bool,
        fail_stop: bool,
        slow_command: Option<String>,
    }

    impl RecordingRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl SandboxRuntime for RecordingRuntime {
        async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
            if image == "missing:latest" {
                return Err(SandboxError::ImageUnavailable {
                    image: image.to_string(),
                    reason: "manifest unknown".to_string(),
                });
            }
            Ok(())
        }

        async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError> {
            self.log(format!("create {}", spec.image));
            Ok("rt-1".to_string())
        }

        async fn start(&self, id: &str) -> Result<(), SandboxError> {
            self.log(format!("start {id}"));
            if self.fail_start {
                return Err(SandboxError::StartFailed {
                    id: id.to_string(),
                    reason: "no cgroup".to_string(),
                });
            }
            Ok(())
        }

        async fn exec(&self, _id: &str, exec: &ExecSpec) -> Result<ExecOutput, SandboxError> {
            self.log(format!("exec {}", exec.command));
            if self.slow_command.as_deref() == Some(exec.command.as_str()) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(ExecOutput {
                exit_code: if exec.command == "false" { 1 } else { 0 },
                stdout: format!("ran {}", exec.command),
                stderr: String::new(),
            })
        }

        async fn terminate_exec(&self, _id: &str, exec_id: &str) -> Result<(), SandboxError> {
            self.log(format!("terminate {exec_id}"));
            Ok(())
        }

        async fn stop(&self, id: &str, _grace: Duration) -> Result<(), SandboxError> {
            self.log(format!("stop {id}"));
            if self.fail_stop {
                return Err(SandboxError::StopFailed {
                    id: id.to_string(),
                    reason: "daemon busy".to_string(),
                });
            }
            Ok(())
        }

        async fn remove(&self, id: &str) -> Result<(), SandboxError> {
            self.log(format!("remove {id}"));
            Ok(())
        }
    }

    fn task() -> Task {
        Task::new("t-1", "do things", "true")
            .with_setup_command("false")
            .with_setup_command("echo ready")
    }

    #[tokio::test]
    async fn test_create_runs_setup_despite_failures() {
        let runtime = Arc::new(RecordingRuntime::default());
        let manager = SandboxManager::new(runtime.clone());

        let handle = manager.create(&task(), &CancellationToken::new()).await.unwrap();
        assert_eq!(handle.task_id(), "t-1");
        assert_eq!(handle.working_dir(), "/workspace");
        assert_eq!(manager.live_count(), 1);
        assert_eq!(
            runtime.calls(),
            vec!["create ubuntu:22.04", "start rt-1", "exec false", "exec echo ready"]
        );
    }

    #[tokio::test]
    async fn test_create_image_failure_leaves_nothing() {
        let runtime = Arc::new(RecordingRuntime::default());
        let manager = SandboxManager::new(runtime.clone());

        let err = manager
            .create(&task().with_image("missing:latest"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ImageUnavailable { .. }));
        assert_eq!(manager.live_count(), 0);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_start_failure_cleans_up() {
        let runtime = Arc::new(RecordingRuntime {
            fail_start: true,
            ..Default::default()
        });
        let manager = SandboxManager::new(runtime.clone());

        let err = manager.create(&task(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::StartFailed { .. }));
        assert_eq!(manager.live_count(), 0);
        assert!(runtime.calls().contains(&"remove rt-1".to_string()));
    }

    #[tokio::test]
    async fn test_exec_reports_exit_code() {
        let manager = SandboxManager::new(Arc::new(RecordingRuntime::default()));
        let handle = manager
            .create(&Task::new("t-1", "x", "true"), &CancellationToken::new())
            .await
            .unwrap();

        let result = manager
            .exec(&handle, &CommandRequest::new("false"), &CancellationToken::new())
            .await;
        assert_eq!(result.exit_code, 1);
        assert!(!result.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_timeout_terminates_process() {
        let runtime = Arc::new(RecordingRuntime {
            slow_command: Some("sleep 100".to_string()),
            ..Default::default()
        });
        let manager = SandboxManager::new(runtime.clone());
        let handle = manager
            .create(&Task::new("t-1", "x", "true"), &CancellationToken::new())
            .await
            .unwrap();

        let result = manager
            .exec(
                &handle,
                &CommandRequest::new("sleep 100").with_timeout(2),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert!(runtime.calls().iter().any(|c| c.starts_with("terminate ")));
    }

    #[tokio::test]
    async fn test_exec_cancelled() {
        let runtime = Arc::new(RecordingRuntime {
            slow_command: Some("sleep 100".to_string()),
            ..Default::default()
        });
        let manager = SandboxManager::new(runtime.clone());
        let handle = manager
            .create(&Task::new("t-1", "x", "true"), &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager
            .exec(&handle, &CommandRequest::new("sleep 100"), &cancel)
            .await;
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stderr, "Command cancelled");
    }

    #[tokio::test]
    async fn test_exec_unknown_handle() {
        let manager = SandboxManager::new(Arc::new(RecordingRuntime::default()));
        let handle = manager
            .create(&Task::new("t-1", "x", "true"), &CancellationToken::new())
            .await
            .unwrap();
        manager.destroy(&handle).await;

        let result = manager
            .exec(&handle, &CommandRequest::new("ls"), &CancellationToken::new())
            .await;
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("not found"));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let runtime = Arc::new(RecordingRuntime::default());
        let manager = SandboxManager::new(runtime.clone());
        let handle = manager
            .create(&Task::new("t-1", "x", "true"), &CancellationToken::new())
            .await
            .unwrap();

        manager.destroy(&handle).await;
        manager.destroy(&handle).await;

        let removes = runtime.calls().iter().filter(|c| c.starts_with("remove")).count();
        assert_eq!(removes, 1);
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_falls_back_to_removal() {
        let runtime = Arc::new(RecordingRuntime {
            fail_stop: true,
            ..Default::default()
        });
        let manager = SandboxManager::new(runtime.clone());
        let handle = manager
            .create(&Task::new("t-1", "x", "true"), &CancellationToken::new())
            .await
            .unwrap();

        manager.destroy(&handle).await;
        let calls = runtime.calls();
        assert!(calls.contains(&"stop rt-1".to_string()));
        assert!(calls.contains(&"remove rt-1".to_string()));
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_all() {
        let manager = SandboxManager::new(Arc::new(RecordingRuntime::default()));
        let cancel = CancellationToken::new();
        let _a = manager.create(&Task::new("a", "x", "true"), &cancel).await.unwrap();
        let _b = manager.create(&Task::new("b", "x", "true"), &cancel).await.unwrap();
        assert_eq!(manager.live_count(), 2);

        manager.destroy_all().await;
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_live_sandboxes_report_creation_time() {
        let manager = SandboxManager::new(Arc::new(RecordingRuntime::default()));
        let cancel = CancellationToken::new();
        let before = Utc::now();
        let a = manager.create(&Task::new("a", "x", "true"), &cancel).await.unwrap();
        let _b = manager.create(&Task::new("b", "x", "true"), &cancel).await.unwrap();

        let live = manager.live_sandboxes();
        let mut tasks: Vec<_> = live.iter().map(|e| e.task_id.as_str()).collect();
        tasks.sort_unstable();
        assert_eq!(tasks, vec!["a", "b"]);
        assert!(live.iter().all(|e| e.created_at >= before && e.created_at <= Utc::now()));
        assert!(live.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        manager.destroy(&a).await;
        let live = manager.live_sandboxes();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].task_id, "b");
    }
}
