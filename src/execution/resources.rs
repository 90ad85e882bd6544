//! Resource caps applied to every sandbox.

use serde::{Deserialize, Serialize};

/// Docker network mode for sandboxes: no external connectivity.
pub const SANDBOX_NETWORK_MODE: &str = "none";

/// CPU scheduling period in microseconds.
const CPU_PERIOD_US: i64 = 100_000;

/// Resource limits for one sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Memory ceiling in megabytes.
    pub memory_mb: u64,
    /// Share of one CPU, in percent (0, 100].
    pub cpu_percent: f64,
    /// Maximum number of processes inside the sandbox.
    pub max_processes: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_percent: 50.0,
            max_processes: 256,
        }
    }
}

impl SandboxLimits {
    pub fn new(memory_mb: u64, cpu_percent: f64, max_processes: u64) -> Self {
        Self {
            memory_mb,
            cpu_percent,
            max_processes,
        }
    }

    /// Returns memory limit in bytes.
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb * 1024 * 1024) as i64
    }

    /// Returns the CFS period in microseconds (fixed at 100ms).
    pub fn cpu_period(&self) -> i64 {
        CPU_PERIOD_US
    }

    /// Returns the CFS quota: `period * cpu_percent / 100`.
    ///
    /// e.g. 50% = 50_000 quota against a 100_000 period.
    pub fn cpu_quota(&self) -> i64 {
        (self.cpu_period() as f64 * self.cpu_percent / 100.0) as i64
    }

    pub fn network_mode(&self) -> &'static str {
        SANDBOX_NETWORK_MODE
    }
}
