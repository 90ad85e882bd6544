//! The seam between the sandbox manager and a concrete isolation backend.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use super::resources::SandboxLimits;
use crate::error::SandboxError;

/// Everything a runtime needs to create one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Name given to the underlying environment.
    pub name: String,
    pub image: String,
    pub working_dir: String,
    pub env: BTreeMap<String, String>,
    pub limits: SandboxLimits,
    /// Labels attached for bookkeeping (task id, owner).
    pub labels: BTreeMap<String, String>,
}

impl SandboxSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            working_dir: "/".to_string(),
            env: BTreeMap::new(),
            limits: SandboxLimits::default(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Environment as `KEY=VALUE` strings.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// One command execution inside a sandbox.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    /// Identifies this execution so it can be terminated later.
    pub exec_id: String,
    /// Shell source, run with `/bin/sh -c`.
    pub command: String,
    pub workdir: Option<String>,
}

/// Raw output of a finished execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Isolation backend driven by [`SandboxManager`](crate::runner::SandboxManager).
///
/// Implementations own the mechanics (images, containers, processes); the
/// manager owns bookkeeping, timeouts and cleanup policy.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Makes sure `image` is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError>;

    /// Creates (but does not start) a sandbox and returns its runtime id.
    async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError>;

    async fn start(&self, id: &str) -> Result<(), SandboxError>;

    /// Runs a command to completion. Returns `SandboxError::NotFound` when
    /// the sandbox does not exist.
    async fn exec(&self, id: &str, exec: &ExecSpec) -> Result<ExecOutput, SandboxError>;

    /// Kills the process tree started by the execution `exec_id`.
    async fn terminate_exec(&self, id: &str, exec_id: &str) -> Result<(), SandboxError>;

    /// Graceful stop, escalating to a kill after `grace`.
    async fn stop(&self, id: &str, grace: Duration) -> Result<(), SandboxError>;

    /// Forced removal.
    async fn remove(&self, id: &str) -> Result<(), SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_spec_builder() {
        let mut env = BTreeMap::new();
        env.insert("B".to_string(), "2".to_string());
        env.insert("A".to_string(), "1".to_string());

        let spec = SandboxSpec::new("termbench-1", "ubuntu:22.04")
            .with_working_dir("/workspace")
            .with_env(env)
            .with_label("termbench.task", "t-1");

        assert_eq!(spec.working_dir, "/workspace");
        assert_eq!(spec.env_list(), vec!["A=1".to_string(), "B=2".to_string()]);
        assert_eq!(spec.labels.get("termbench.task").map(String::as_str), Some("t-1"));
        assert_eq!(spec.limits, SandboxLimits::default());
    }
}
