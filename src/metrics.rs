//! Metrics collection for reduction runs.

use serde::{Deserialize, Serialize};

/// Aggregated statistics for one or more reduction runs.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReduceMetrics {
    /// Total shards across all recorded runs.
    pub shards_total: usize,
    /// Shards the dispatcher launched a worker for.
    pub shards_dispatched: usize,
    /// Shards whose reduction produced a partial result.
    pub shards_succeeded: usize,
    /// Shards whose reduction failed or panicked.
    pub shards_failed: usize,
    /// Highest number of workers observed running at once.
    pub peak_concurrency: usize,
    /// Wall-clock time spent in runs, in milliseconds.
    pub elapsed_ms: u64,
    /// Collected failure messages.
    pub failures: Vec<String>,
}

impl ReduceMetrics {
    /// Record a launched worker.
    pub fn record_dispatch(&mut self) {
        self.shards_dispatched += 1;
    }

    /// Record a partial result.
    pub fn record_success(&mut self) {
        self.shards_succeeded += 1;
    }

    /// Record a failure message.
    pub fn record_failure(&mut self, error: String) {
        self.shards_failed += 1;
        self.failures.push(error);
    }

    /// Raise the peak concurrency to `running` if it is higher.
    pub fn observe_concurrency(&mut self, running: usize) {
        self.peak_concurrency = self.peak_concurrency.max(running);
    }

    /// Check if there were any failures.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Shards dispatched but not yet accounted for as a success or failure.
    pub fn outstanding(&self) -> usize {
        self.shards_dispatched
            .saturating_sub(self.shards_succeeded + self.shards_failed)
    }
}
