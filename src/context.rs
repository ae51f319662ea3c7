//! Observation context for reduction runs.
//!
//! A `ReduceContext` is handed to the dispatcher and every worker so they can
//! record metrics and structured events. It is purely observational: the
//! aggregator never reads it, and no control decision depends on it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::ShardFailure;
use crate::events::{EngineEvent, TraceEntry};
use crate::metrics::ReduceMetrics;

/// Context shared by every participant in a run.
///
/// Cloning is cheap and clones share the same metrics and trace log, so a
/// single context can accumulate statistics across several runs.
///
/// # Example
///
/// ```rust
/// use parallel_reduce::{EngineEvent, ReduceContext};
///
/// let ctx = ReduceContext::new();
/// ctx.emit(EngineEvent::ShardDispatched { shard_index: 0, len: 3 });
///
/// let traces = ctx.trace_snapshot();
/// assert_eq!(traces.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ReduceContext {
    /// Shared metrics accumulator.
    pub metrics: Arc<Mutex<ReduceMetrics>>,
    /// Shared trace log for structured engine events.
    pub traces: Arc<Mutex<Vec<TraceEntry>>>,
}

impl Default for ReduceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ReduceContext {
    /// Create a new context with empty metrics and traces.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Mutex::new(ReduceMetrics::default())),
            traces: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn metrics(&self) -> MutexGuard<'_, ReduceMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn traces(&self) -> MutexGuard<'_, Vec<TraceEntry>> {
        self.traces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn begin_run(&self, input_len: usize, shard_count: usize, max_concurrency: usize) {
        self.metrics().shards_total += shard_count;
        self.emit(EngineEvent::RunStart {
            input_len,
            shard_count,
            max_concurrency,
        });
    }

    pub(crate) fn end_run(&self, success: bool, duration_ms: u64) {
        self.metrics().elapsed_ms += duration_ms;
        self.emit(EngineEvent::RunEnd {
            success,
            duration_ms,
        });
    }

    /// Record that a worker was launched while `running` workers were active.
    pub fn record_dispatch(&self, shard_index: usize, len: usize, running: usize) {
        {
            let mut m = self.metrics();
            m.record_dispatch();
            m.observe_concurrency(running);
        }
        self.emit(EngineEvent::ShardDispatched { shard_index, len });
    }

    /// Record a shard's partial result once the aggregator has accepted it.
    pub fn record_success(&self, shard_index: usize, duration_ms: u64) {
        self.metrics().record_success();
        self.emit(EngineEvent::ShardCompleted {
            shard_index,
            duration_ms,
        });
    }

    /// Record a shard's failure.
    pub fn record_failure(&self, failure: &ShardFailure) {
        self.metrics().record_failure(failure.to_string());
        self.emit(EngineEvent::ShardFailed {
            shard_index: failure.shard_index,
            message: failure.message.clone(),
        });
    }

    /// Record that a shard's outcome was dropped because nobody was collecting.
    pub fn record_discarded(&self, shard_index: usize) {
        self.emit(EngineEvent::ShardDiscarded { shard_index });
    }

    /// Record that a run was cancelled with `outstanding` shards unreported.
    pub fn record_cancelled(&self, outstanding: usize) {
        self.emit(EngineEvent::Cancelled { outstanding });
    }

    /// Get a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> ReduceMetrics {
        self.metrics().clone()
    }

    /// Emit a structured engine event to the trace log.
    pub fn emit(&self, event: EngineEvent) {
        let entry = TraceEntry::new(event);
        self.traces().push(entry);
    }

    /// Get a snapshot of the current trace log.
    #[must_use]
    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        self.traces().clone()
    }

    /// Clear all trace entries.
    pub fn clear_traces(&self) {
        self.traces().clear();
    }
}
