//! Prometheus metrics registration and export.
//!
//! Metrics live in process-wide statics and stay inert until
//! [`init_metrics`] has run, so library users that never scrape pay nothing.

use prometheus::{CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all termbench metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finished task evaluations, labeled by outcome.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Task evaluation duration in seconds.
pub static TASK_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Sandboxes currently registered with the sandbox manager.
pub static ACTIVE_SANDBOXES: OnceLock<Gauge> = OnceLock::new();

/// Commands executed in sandboxes, labeled by status.
pub static COMMANDS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling it again is harmless: the first registration wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric construction or registration
/// fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let tasks_total = CounterVec::new(
        Opts::new("termbench_tasks_total", "Total number of evaluated tasks"),
        &["outcome"],
    )?;

    let task_duration = Histogram::with_opts(
        HistogramOpts::new(
            "termbench_task_duration_seconds",
            "Task evaluation duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )?;

    let active_sandboxes = Gauge::new(
        "termbench_active_sandboxes",
        "Number of sandboxes currently alive",
    )?;

    let commands_total = CounterVec::new(
        Opts::new("termbench_commands_total", "Total commands executed in sandboxes"),
        &["status"],
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(active_sandboxes.clone()))?;
    registry.register(Box::new(commands_total.clone()))?;

    // A concurrent initializer may have won; its metrics stay in use.
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = ACTIVE_SANDBOXES.set(active_sandboxes);
    let _ = COMMANDS_TOTAL.set(commands_total);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when metrics were never initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
