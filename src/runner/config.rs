//! Configuration for evaluation runs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::execution::SandboxLimits;

/// Dataset evaluated when none is given.
pub const DEFAULT_DATASET: &str = "terminal-bench-core";

/// Settings shared by the orchestrator, evaluator and sandbox manager.
///
/// Timeouts are kept in whole seconds so YAML files stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Dataset name or path handed to the task loader.
    pub dataset: String,
    /// Maximum number of executed commands per task.
    pub max_turns: u32,
    /// Wall-clock budget for one task, in seconds.
    pub task_timeout_secs: u64,
    /// Timeout of each setup command, in seconds.
    pub setup_timeout_secs: u64,
    /// Timeout of the verification script, in seconds.
    pub verification_timeout_secs: u64,
    /// Number of tasks evaluated at the same time.
    pub concurrency: usize,
    /// Grace period given to a sandbox before it is killed, in seconds.
    pub stop_grace_secs: u64,
    pub limits: SandboxLimits,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            max_turns: 50,
            task_timeout_secs: 600,
            setup_timeout_secs: 30,
            verification_timeout_secs: 60,
            concurrency: 1,
            stop_grace_secs: 5,
            limits: SandboxLimits::default(),
        }
    }
}

impl EvaluatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_secs = grace.as_secs();
        self
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Loads a configuration file; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Defaults overridden by `TERMBENCH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields from `TERMBENCH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but does not
    /// parse.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dataset) = lookup("TERMBENCH_DATASET") {
            self.dataset = dataset;
        }
        if let Some(value) = parse_var(&lookup, "TERMBENCH_MAX_TURNS")? {
            self.max_turns = value;
        }
        if let Some(value) = parse_var(&lookup, "TERMBENCH_TASK_TIMEOUT_SECS")? {
            self.task_timeout_secs = value;
        }
        if let Some(value) = parse_var(&lookup, "TERMBENCH_CONCURRENCY")? {
            self.concurrency = value;
        }
        if let Some(value) = parse_var(&lookup, "TERMBENCH_MEMORY_MB")? {
            self.limits.memory_mb = value;
        }
        if let Some(value) = parse_var(&lookup, "TERMBENCH_CPU_PERCENT")? {
            self.limits.cpu_percent = value;
        }
        Ok(self)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_turns must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let timeouts = [
            ("task_timeout_secs", self.task_timeout_secs),
            ("setup_timeout_secs", self.setup_timeout_secs),
            ("verification_timeout_secs", self.verification_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::ValidationFailed(format!(
                "{name} must be greater than zero"
            )));
        }
        let cpu = self.limits.cpu_percent;
        if !(cpu > 0.0 && cpu <= 100.0) {
            return Err(ConfigError::ValidationFailed(format!(
                "cpu_percent must be in (0, 100], got {cpu}"
            )));
        }
        if self.limits.memory_mb == 0 {
            return Err(ConfigError::ValidationFailed(
                "memory_mb must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}
