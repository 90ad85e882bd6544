//! Task descriptor.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::TaskLoadError;
use crate::protocol::{TaskContext, TaskInstruction};

/// Working directory used when a task does not specify one.
pub const DEFAULT_WORKING_DIRECTORY: &str = "/workspace";

/// Image used when a task does not specify one.
pub const DEFAULT_IMAGE: &str = "ubuntu:22.04";

fn default_working_directory() -> String {
    DEFAULT_WORKING_DIRECTORY.to_string()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_expected_reward() -> f64 {
    1.0
}

/// One benchmark task. Immutable after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    #[serde(alias = "task_id")]
    pub id: String,
    /// Natural-language instruction shown to the participant.
    pub instruction: String,
    /// Working directory inside the sandbox.
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    /// Environment variables set in the sandbox.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Shell script deciding pass/fail by exit code.
    #[serde(alias = "test_script")]
    pub verification_script: String,
    /// Container image the sandbox is built from.
    #[serde(default = "default_image", alias = "docker_image")]
    pub image: String,
    /// Commands run in order after the sandbox starts.
    #[serde(default)]
    pub setup_commands: Vec<String>,
    /// Reward granted when verification passes.
    #[serde(default = "default_expected_reward")]
    pub expected_reward: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Task {
    /// Creates a task with default image, working directory and reward.
    pub fn new(
        id: impl Into<String>,
        instruction: impl Into<String>,
        verification_script: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            instruction: instruction.into(),
            working_directory: default_working_directory(),
            environment: BTreeMap::new(),
            verification_script: verification_script.into(),
            image: default_image(),
            setup_commands: Vec::new(),
            expected_reward: default_expected_reward(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_setup_command(mut self, command: impl Into<String>) -> Self {
        self.setup_commands.push(command.into());
        self
    }

    pub fn with_expected_reward(mut self, reward: f64) -> Self {
        self.expected_reward = reward;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Context sent to the participant with the instruction.
    pub fn context(&self) -> TaskContext {
        TaskContext {
            working_directory: self.working_directory.clone(),
            environment: self.environment.clone(),
        }
    }

    /// The first message of this task's conversation.
    pub fn instruction_message(&self) -> TaskInstruction {
        TaskInstruction {
            task_id: self.id.clone(),
            instruction: self.instruction.clone(),
            context: self.context(),
        }
    }

    /// Checks the fields a loaded task must carry.
    pub fn validate(&self) -> Result<(), TaskLoadError> {
        let invalid = |reason: &str| TaskLoadError::InvalidTask {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("task id is empty"));
        }
        if self.verification_script.trim().is_empty() {
            return Err(invalid("verification script is empty"));
        }
        if self.image.trim().is_empty() {
            return Err(invalid("image is empty"));
        }
        if !self.expected_reward.is_finite() || self.expected_reward < 0.0 {
            return Err(invalid("expected reward must be a non-negative number"));
        }
        Ok(())
    }
}
