//! Error types for termbench operations.
//!
//! Each subsystem gets its own error enum:
//! - Sandbox provisioning and command execution
//! - Participant messaging (transport and protocol)
//! - Task loading
//! - Configuration
//! - Run-level orchestration

use thiserror::Error;

/// Errors raised by the sandbox runtime and the sandbox manager.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Image '{image}' is not available: {reason}")]
    ImageUnavailable { image: String, reason: String },

    #[error("Failed to create sandbox: {0}")]
    CreateFailed(String),

    #[error("Failed to start sandbox '{id}': {reason}")]
    StartFailed { id: String, reason: String },

    #[error("Sandbox '{id}' not found")]
    NotFound { id: String },

    #[error("Command execution failed: {0}")]
    ExecFailed(String),

    #[error("Failed to stop sandbox '{id}': {reason}")]
    StopFailed { id: String, reason: String },

    #[error("Failed to remove sandbox '{id}': {reason}")]
    RemoveFailed { id: String, reason: String },

    #[error("Sandbox runtime not available: {0}")]
    RuntimeUnavailable(String),

    #[error("Sandbox operation cancelled")]
    Cancelled,
}

/// Errors raised while talking to the participant agent.
#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("Participant unreachable: {0}")]
    Transport(String),

    #[error("Participant returned HTTP {code}: {message}")]
    Http { code: u16, message: String },

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Malformed participant response: {0}")]
    Protocol(String),
}

/// Errors raised while loading a task dataset.
#[derive(Debug, Error)]
pub enum TaskLoadError {
    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    #[error("Failed to parse task file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Duplicate task id '{0}'")]
    DuplicateTask(String),

    #[error("Invalid task '{id}': {reason}")]
    InvalidTask { id: String, reason: String },

    #[error("Task loading was interrupted: {0}")]
    Interrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a whole evaluation run.
///
/// Per-task failures never surface here; they are folded into the task's
/// `EvaluationResult`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to load tasks: {0}")]
    TaskLoad(#[from] TaskLoadError),

    #[error("An evaluation run is already in progress")]
    AlreadyRunning,
}
