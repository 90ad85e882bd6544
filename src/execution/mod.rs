//! Sandbox execution layer.
//!
//! [`SandboxRuntime`] is the narrow seam the sandbox manager drives;
//! [`DockerRuntime`] implements it with the bollard crate.
//!
//! # Example
//!
//! ```ignore
//! use termbench::execution::{DockerRuntime, SandboxRuntime, SandboxSpec};
//!
//! let runtime = DockerRuntime::connect()?;
//! runtime.ensure_image("ubuntu:22.04").await?;
//! let id = runtime.create(&SandboxSpec::new("termbench-demo", "ubuntu:22.04")).await?;
//! runtime.start(&id).await?;
//! ```

pub mod docker_client;
pub mod resources;
pub mod runtime;

pub use docker_client::DockerRuntime;
pub use resources::{SandboxLimits, SANDBOX_NETWORK_MODE};
pub use runtime::{ExecOutput, ExecSpec, SandboxRuntime, SandboxSpec};
