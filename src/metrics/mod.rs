//! Result aggregation and operational metrics.
//!
//! [`MetricsAggregator`] turns per-task results into the run report;
//! [`MetricsCollector`] feeds the Prometheus counters.
//!
//! # Example
//!
//! ```ignore
//! use termbench::metrics::{export_metrics, init_metrics, MetricsAggregator};
//!
//! init_metrics()?;
//! let mut aggregator = MetricsAggregator::new();
//! aggregator.record(result);
//! println!("{}", aggregator.summary());
//! println!("{}", export_metrics());
//! ```

pub mod aggregator;
pub mod collectors;
pub mod prometheus;

pub use aggregator::{AggregateMetrics, BenchmarkReport, MetricsAggregator};
pub use collectors::{command_status, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics};
