//! Benchmark task descriptors and dataset loading.

pub mod loader;
pub mod types;

pub use loader::{sample_tasks, StaticTaskSource, TaskLoader, TaskSource};
pub use types::{Task, DEFAULT_IMAGE, DEFAULT_WORKING_DIRECTORY};
