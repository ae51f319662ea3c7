//! Dispatcher: launches one worker per shard under a concurrency bound.
//!
//! A worker holds a semaphore permit from launch until its record has been
//! accepted by the completion channel. With `limit` permits, at most `limit`
//! workers are ever running, and the next shard starts as soon as any slot
//! frees up.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::CompletionSink;
use crate::context::ReduceContext;
use crate::partition::Shard;
use crate::worker::{ShardReducer, Worker, WorkerFactory, WorkerState};

/// What the dispatcher did during a run.
#[derive(Debug)]
pub struct DispatchReport {
    /// Shard indices that were launched, in launch order.
    pub dispatched: Vec<usize>,
    /// Highest number of workers observed running at once.
    pub peak_concurrency: usize,
    /// Whether dispatching stopped early because of cancellation.
    pub cancelled: bool,
    /// Join handles of every launched worker task.
    pub workers: Vec<JoinHandle<WorkerState>>,
}

/// Owns the worker set for one run.
pub struct Dispatcher {
    limit: usize,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher allowing at most `limit` concurrent workers.
    ///
    /// A `limit` of zero is treated as one.
    pub fn new(limit: usize, cancel: CancellationToken) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            slots: Arc::new(Semaphore::new(limit)),
            cancel,
        }
    }

    /// Number of workers currently holding a slot.
    pub fn running(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    /// Launch a worker for every shard, in shard order, waiting for a free slot
    /// whenever all `limit` slots are taken.
    ///
    /// Returns once every shard has been launched, or as soon as `cancel` fires.
    /// Launched workers are never aborted; they run to completion and deliver
    /// their record to `sink` (or discover the receiver is gone).
    pub async fn run<E, S, F, K>(
        &self,
        shards: Vec<Shard>,
        mut factory: F,
        sink: K,
        ctx: &ReduceContext,
    ) -> DispatchReport
    where
        E: Send + Sync + 'static,
        S: ShardReducer<E>,
        F: WorkerFactory<Worker<E, S>>,
        K: CompletionSink<S::Output>,
    {
        let mut report = DispatchReport {
            dispatched: Vec::with_capacity(shards.len()),
            peak_concurrency: 0,
            cancelled: false,
            workers: Vec::with_capacity(shards.len()),
        };

        for shard in shards {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&self.slots).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                report.cancelled = true;
                break;
            };

            let running = self.running();
            report.peak_concurrency = report.peak_concurrency.max(running);
            report.dispatched.push(shard.index);
            ctx.record_dispatch(shard.index, shard.len(), running);
            debug!(shard = shard.index, running, "dispatching shard");

            let worker = factory.create_worker(shard);
            let sink = sink.clone();
            let ctx = ctx.clone();
            report.workers.push(tokio::spawn(async move {
                let state = worker.run(&sink, &ctx).await;
                drop(permit);
                state
            }));
        }

        if report.cancelled {
            info!(
                dispatched = report.dispatched.len(),
                "dispatch stopped by cancellation"
            );
        }
        report
    }
}
