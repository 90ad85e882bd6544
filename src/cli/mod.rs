//! Command-line interface for termbench.
//!
//! Provides the `run` command for evaluating a participant agent and the
//! `tasks` command for inspecting datasets.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
