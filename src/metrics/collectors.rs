//! Recording helpers over the raw Prometheus statics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! been called.

use super::prometheus::{ACTIVE_SANDBOXES, COMMANDS_TOTAL, TASKS_TOTAL, TASK_DURATION};
use crate::protocol::CommandResult;

/// Metrics collector for recording termbench operational metrics.
///
/// # Example
///
/// ```ignore
/// use termbench::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_task("passed", 12.5);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished task evaluation.
    ///
    /// `outcome` is `passed`, `failed`, or a failure label such as `timeout`.
    pub fn record_task(&self, outcome: &str, duration_secs: f64) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[outcome]).inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration.observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    /// Record one executed command by its status.
    pub fn record_command(&self, result: &CommandResult) {
        if let Some(commands_total) = COMMANDS_TOTAL.get() {
            commands_total
                .with_label_values(&[command_status(result)])
                .inc();
        }
    }

    pub fn sandbox_created(&self) {
        if let Some(gauge) = ACTIVE_SANDBOXES.get() {
            gauge.inc();
        }
    }

    pub fn sandbox_destroyed(&self) {
        if let Some(gauge) = ACTIVE_SANDBOXES.get() {
            gauge.dec();
        }
    }
}

/// Label for the `termbench_commands_total` counter.
pub fn command_status(result: &CommandResult) -> &'static str {
    if result.timed_out {
        "timeout"
    } else if result.exit_code == 0 {
        "success"
    } else {
        "failure"
    }
}
