//! Task evaluation runner.
//!
//! # Architecture
//!
//! ```text
//! TaskSource → Orchestrator → Evaluator ─┬─ SandboxManager → SandboxRuntime
//!                   │                    ├─ Messenger (participant)
//!                   │                    └─ Verifier
//!                   └→ MetricsAggregator
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use termbench::execution::DockerRuntime;
//! use termbench::messenger::A2aMessenger;
//! use termbench::runner::{EvaluatorConfig, Evaluator, Orchestrator, SandboxManager};
//! use termbench::task::TaskLoader;
//!
//! let config = EvaluatorConfig::from_env()?;
//! let sandboxes = Arc::new(SandboxManager::new(Arc::new(DockerRuntime::connect()?)));
//! let messenger = Arc::new(A2aMessenger::new("http://localhost:9009")?);
//! let evaluator = Evaluator::new(sandboxes, messenger, &config);
//! let orchestrator = Orchestrator::new(Arc::new(TaskLoader::new(&config.dataset)), evaluator);
//!
//! let report = orchestrator.run(CancellationToken::new()).await?;
//! println!("{}", report.summary());
//! ```

pub mod config;
pub mod evaluator;
pub mod orchestrator;
pub mod result;
pub mod sandbox;
pub mod verifier;

pub use config::{EvaluatorConfig, DEFAULT_DATASET};
pub use evaluator::{Evaluator, TaskState};
pub use orchestrator::{Orchestrator, RunStatus};
pub use result::{EvaluationResult, TaskFailure, Verdict, CANCELLED_ERROR, TASK_TIMEOUT_ERROR};
pub use sandbox::{SandboxEntry, SandboxHandle, SandboxId, SandboxManager, SandboxRegistry};
pub use verifier::{VerificationOutcome, Verifier, VERIFICATION_TIMEOUT_SECS};
