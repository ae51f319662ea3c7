//! Workers: one reduction over one shard, handed off exactly once.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::channel::{CompletionSink, ShardRecord};
use crate::context::ReduceContext;
use crate::error::ShardFailure;
use crate::partition::Shard;

/// The caller's reduction over a single shard.
///
/// Implemented for every `Fn(&[E]) -> Result<R, Err>` closure, so most callers
/// never name this trait. Implementations must be pure: the engine may run
/// them on any thread, in any order, and never interrupts one midway.
pub trait ShardReducer<E>: Send + Sync + 'static {
    /// The partial result produced for a shard.
    type Output: Send + 'static;
    /// The error signalled when a shard cannot be reduced.
    type Error: fmt::Display;

    /// Reduce the items of one shard. `items` may be empty.
    fn reduce(&self, items: &[E]) -> std::result::Result<Self::Output, Self::Error>;
}

impl<E, F, R, Err> ShardReducer<E> for F
where
    F: Fn(&[E]) -> std::result::Result<R, Err> + Send + Sync + 'static,
    R: Send + 'static,
    Err: fmt::Display,
{
    type Output = R;
    type Error = Err;

    fn reduce(&self, items: &[E]) -> std::result::Result<R, Err> {
        (self)(items)
    }
}

/// Lifecycle of a worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Bound to a shard but not started.
    Created,
    /// The reduction is executing.
    Running,
    /// The reduction produced a partial result.
    Succeeded,
    /// The reduction failed or panicked.
    Failed,
}

/// Trait for creating the worker that will process a shard.
pub trait WorkerFactory<W>: Send {
    /// Build the worker for `shard`.
    fn create_worker(&mut self, shard: Shard) -> W;
}

impl<F, W> WorkerFactory<W> for F
where
    F: FnMut(Shard) -> W + Send,
{
    fn create_worker(&mut self, shard: Shard) -> W {
        (self)(shard)
    }
}

/// A single unit of execution bound to one shard of a shared, read-only input.
pub struct Worker<E, S> {
    shard: Shard,
    input: Arc<[E]>,
    reducer: Arc<S>,
    state: WorkerState,
    elapsed_ms: u64,
}

impl<E, S> Worker<E, S>
where
    E: Send + Sync + 'static,
    S: ShardReducer<E>,
{
    /// Bind a worker to `shard` of `input`.
    pub fn new(shard: Shard, input: Arc<[E]>, reducer: Arc<S>) -> Self {
        Self {
            shard,
            input,
            reducer,
            state: WorkerState::Created,
            elapsed_ms: 0,
        }
    }

    /// The shard this worker is bound to.
    pub fn shard(&self) -> Shard {
        self.shard
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run the reduction on tokio's blocking pool and build this shard's record.
    ///
    /// Errors and panics from the reduction become failure records; they never
    /// propagate out of the worker.
    pub async fn compute(&mut self) -> ShardRecord<S::Output> {
        self.state = WorkerState::Running;
        let shard = self.shard;
        let input = Arc::clone(&self.input);
        let reducer = Arc::clone(&self.reducer);

        let started = Instant::now();
        let joined = tokio::task::spawn_blocking(move || match input.get(shard.range()) {
            Some(items) => reducer.reduce(items).map_err(|e| e.to_string()),
            None => Err(format!(
                "range {}..{} exceeds input of length {}",
                shard.start,
                shard.end,
                input.len()
            )),
        })
        .await;
        self.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let record = match joined {
            Ok(Ok(value)) => ShardRecord::success(shard.index, value),
            Ok(Err(message)) => ShardRecord::failure(ShardFailure::reduce(shard.index, message)),
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "worker task was cancelled by the runtime".to_string()
                };
                ShardRecord::failure(ShardFailure::panicked(shard.index, message))
            }
        };

        self.state = if record.is_success() {
            WorkerState::Succeeded
        } else {
            WorkerState::Failed
        };
        record.with_elapsed_ms(self.elapsed_ms)
    }

    /// Compute this shard's record and hand it off to `sink`, exactly once.
    ///
    /// Success and failure counts are left to whoever accepts the record. If
    /// the sink refuses it, a discard event is recorded in `ctx` instead.
    pub async fn run<K>(mut self, sink: &K, ctx: &ReduceContext) -> WorkerState
    where
        K: CompletionSink<S::Output>,
    {
        let index = self.shard.index;
        debug!(shard = index, len = self.shard.len(), "worker started");
        let record = self.compute().await;

        match &record.outcome {
            Ok(_) => debug!(shard = index, elapsed_ms = self.elapsed_ms, "worker finished"),
            Err(failure) => warn!(shard = index, error = %failure, "worker failed"),
        }

        if !sink.deliver(record).await {
            debug!(shard = index, "aggregator gone; result discarded");
            ctx.record_discarded(index);
        }
        self.state
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reduction panicked".to_string()
    }
}
