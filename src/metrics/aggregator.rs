//! Aggregate statistics over evaluation results.
//!
//! [`MetricsAggregator`] only stores the ordered result list; every
//! statistic is recomputed from it on demand.

use serde::{Deserialize, Serialize};

use crate::runner::EvaluationResult;

/// Statistics derived from the recorded results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub count: usize,
    pub passed: usize,
    pub failed: usize,
    /// `passed / count`, or 0.0 with no results.
    pub pass_rate: f64,
    pub avg_turns: f64,
    /// Mean wall-clock seconds per task.
    pub avg_time: f64,
    pub total_reward: f64,
}

impl AggregateMetrics {
    pub fn from_results(results: &[EvaluationResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let count = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let total_turns: u64 = results.iter().map(|r| u64::from(r.turns)).sum();
        let total_time: f64 = results.iter().map(|r| r.total_time).sum();
        let total_reward: f64 = results.iter().map(|r| r.reward).sum();

        Self {
            count,
            passed,
            failed: count - passed,
            pass_rate: passed as f64 / count as f64,
            avg_turns: total_turns as f64 / count as f64,
            avg_time: total_time / count as f64,
            total_reward,
        }
    }
}

/// Final report of a run, suitable for JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub dataset: String,
    /// Number of recorded results.
    pub total_tasks: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub avg_turns: f64,
    pub avg_time: f64,
    pub total_reward: f64,
    /// Results in evaluation order.
    pub results: Vec<EvaluationResult>,
}

impl BenchmarkReport {
    pub fn metrics(&self) -> AggregateMetrics {
        AggregateMetrics {
            count: self.total_tasks,
            passed: self.passed,
            failed: self.failed,
            pass_rate: self.pass_rate,
            avg_turns: self.avg_turns,
            avg_time: self.avg_time,
            total_reward: self.total_reward,
        }
    }

    /// Human-readable summary block.
    pub fn summary(&self) -> String {
        let rule = "=".repeat(50);
        [
            rule.clone(),
            "TerminalBench Evaluation Summary".to_string(),
            rule.clone(),
            format!("Dataset: {}", self.dataset),
            format!("Total Tasks: {}", self.total_tasks),
            format!("Passed: {}", self.passed),
            format!("Failed: {}", self.failed),
            format!("Pass Rate: {:.1}%", self.pass_rate * 100.0),
            format!("Average Turns: {:.1}", self.avg_turns),
            format!("Average Time: {:.1}s", self.avg_time),
            format!("Total Reward: {:.1}", self.total_reward),
            rule,
        ]
        .join("\n")
    }
}

/// Ordered store of evaluation results.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    dataset: String,
    expected_tasks: usize,
    results: Vec<EvaluationResult>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears results, dataset name and expected task count.
    pub fn reset(&mut self) {
        self.dataset.clear();
        self.expected_tasks = 0;
        self.results.clear();
    }

    pub fn set_dataset(&mut self, dataset: impl Into<String>) {
        self.dataset = dataset.into();
    }

    /// Number of tasks the current run is expected to produce.
    pub fn set_total_tasks(&mut self, total: usize) {
        self.expected_tasks = total;
    }

    pub fn expected_tasks(&self) -> usize {
        self.expected_tasks
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn record(&mut self, result: EvaluationResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[EvaluationResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn snapshot(&self) -> AggregateMetrics {
        AggregateMetrics::from_results(&self.results)
    }

    pub fn report(&self) -> BenchmarkReport {
        let metrics = self.snapshot();
        BenchmarkReport {
            dataset: self.dataset.clone(),
            total_tasks: metrics.count,
            passed: metrics.passed,
            failed: metrics.failed,
            pass_rate: metrics.pass_rate,
            avg_turns: metrics.avg_turns,
            avg_time: metrics.avg_time,
            total_reward: metrics.total_reward,
            results: self.results.clone(),
        }
    }

    pub fn summary(&self) -> String {
        self.report().summary()
    }

    pub fn export_json(&self) -> serde_json::Value {
        serde_json::to_value(self.report()).unwrap_or(serde_json::Value::Null)
    }

    /// First recorded result for `task_id`.
    pub fn task_result(&self, task_id: &str) -> Option<&EvaluationResult> {
        self.results.iter().find(|r| r.task_id == task_id)
    }
}
