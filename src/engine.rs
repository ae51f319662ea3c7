//! The reduce engine: partition, dispatch, and aggregate in one call.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::channel::{completion_channel, CompletionReceiver, ShardOutcome};
use crate::config::EngineConfig;
use crate::context::ReduceContext;
use crate::dispatcher::Dispatcher;
use crate::partition;
use crate::worker::{ShardReducer, Worker};
use crate::{Error, Result};

/// A per-shard reduction paired with the function that combines partial results.
///
/// `combine` is always applied in shard-index order, so it does not need to be
/// commutative. An optional `identity` is returned as-is for empty input.
pub struct Reduction<S, C, R> {
    reducer: S,
    combine: C,
    identity: Option<R>,
}

impl<S, C, R> Reduction<S, C, R> {
    /// Pair a reduction closure with a combine closure.
    pub fn new<E, Err>(reduce_fn: S, combine_fn: C) -> Self
    where
        S: Fn(&[E]) -> std::result::Result<R, Err> + Send + Sync + 'static,
        C: Fn(R, R) -> R,
    {
        Self::from_reducer(reduce_fn, combine_fn)
    }

    /// Pair any [`ShardReducer`] implementation with a combine closure.
    pub fn from_reducer(reducer: S, combine_fn: C) -> Self {
        Self {
            reducer,
            combine: combine_fn,
            identity: None,
        }
    }

    /// Value to return when the input is empty, without running any worker.
    pub fn with_identity(mut self, identity: R) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// Runs reductions with a fixed, validated [`EngineConfig`].
///
/// # Example
///
/// ```rust
/// use parallel_reduce::{EngineConfig, Reduction, ReduceEngine};
///
/// # tokio_test::block_on(async {
/// let engine = ReduceEngine::new(EngineConfig::new(2)).unwrap();
/// let sum = Reduction::new(
///     |items: &[i64]| Ok::<i64, String>(items.iter().sum()),
///     |a, b| a + b,
/// );
///
/// let total = engine.reduce(vec![7, 2, 8, -9, 4, 0], sum, None).await.unwrap();
/// assert_eq!(total, 12);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ReduceEngine {
    config: EngineConfig,
}

impl ReduceEngine {
    /// Validate `config` and build an engine around it.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reduce `input` and return the combined value.
    ///
    /// Fails with [`Error::Aggregate`] if any shard failed, or
    /// [`Error::Cancelled`] if `cancel` fires (or the configured timeout
    /// elapses) before every shard has reported.
    pub async fn reduce<E, S, C>(
        &self,
        input: impl Into<Arc<[E]>>,
        reduction: Reduction<S, C, S::Output>,
        cancel: Option<&CancellationToken>,
    ) -> Result<S::Output>
    where
        E: Send + Sync + 'static,
        S: ShardReducer<E>,
        C: Fn(S::Output, S::Output) -> S::Output + Send,
    {
        let ctx = ReduceContext::new();
        self.reduce_with_ctx(&ctx, input, reduction, cancel).await
    }

    /// Like [`reduce`](Self::reduce), recording metrics and events into `ctx`.
    pub async fn reduce_with_ctx<E, S, C>(
        &self,
        ctx: &ReduceContext,
        input: impl Into<Arc<[E]>>,
        reduction: Reduction<S, C, S::Output>,
        cancel: Option<&CancellationToken>,
    ) -> Result<S::Output>
    where
        E: Send + Sync + 'static,
        S: ShardReducer<E>,
        C: Fn(S::Output, S::Output) -> S::Output + Send,
    {
        let input = input.into();
        let Reduction {
            reducer,
            combine,
            identity,
        } = reduction;

        if input.is_empty() {
            if let Some(identity) = identity {
                ctx.begin_run(0, self.config.shard_count, self.config.effective_concurrency());
                ctx.end_run(true, 0);
                return Ok(identity);
            }
        }

        self.execute(ctx, input, reducer, cancel, |agg, rx, token| {
            agg.collect(rx, combine, token)
        })
        .await
    }

    /// Run every shard and return each outcome in shard-index order, without
    /// combining. Shard failures are returned inline instead of failing the call.
    pub async fn partials<E, S>(
        &self,
        input: impl Into<Arc<[E]>>,
        reducer: S,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ShardOutcome<S::Output>>>
    where
        E: Send + Sync + 'static,
        S: ShardReducer<E>,
    {
        let ctx = ReduceContext::new();
        self.execute(&ctx, input.into(), reducer, cancel, |agg, rx, token| {
            agg.collect_outcomes(rx, token)
        })
        .await
    }

    async fn execute<E, S, T, F, Fut>(
        &self,
        ctx: &ReduceContext,
        input: Arc<[E]>,
        reducer: S,
        cancel: Option<&CancellationToken>,
        collect: F,
    ) -> Result<T>
    where
        E: Send + Sync + 'static,
        S: ShardReducer<E>,
        F: FnOnce(Aggregator<S::Output>, CompletionReceiver<S::Output>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let shard_count = self.config.shard_count;
        let limit = self.config.effective_concurrency();
        let shards = partition::split(input.len(), shard_count)?;

        let started = Instant::now();
        ctx.begin_run(input.len(), shard_count, limit);
        info!(input_len = input.len(), shard_count, max_concurrency = limit, "reduce started");

        let token = cancel.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let deadline = self.config.timeout().map(|timeout| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        });

        let (tx, rx) = completion_channel(self.config.channel_mode());
        let dispatcher = Dispatcher::new(limit, token.clone());
        let reducer = Arc::new(reducer);
        let factory = |shard| Worker::new(shard, Arc::clone(&input), Arc::clone(&reducer));

        let (report, mut result) = tokio::join!(
            dispatcher.run(shards, factory, tx, ctx),
            collect(
                Aggregator::new(shard_count).with_context(ctx.clone()),
                rx,
                token.clone(),
            ),
        );
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        if let Err(Error::Cancelled {
            completed,
            outstanding,
            timed_out,
        }) = &mut result
        {
            // The run token fires only from the caller's signal or the deadline.
            *timed_out = !cancel.is_some_and(CancellationToken::is_cancelled);
            ctx.record_cancelled(outstanding.len());
            warn!(
                completed = completed.len(),
                outstanding = outstanding.len(),
                timed_out = *timed_out,
                "reduce cancelled"
            );
        } else {
            // Every worker has delivered by now; reap the tasks.
            for joined in join_all(report.workers).await {
                if let Err(e) = joined {
                    warn!(error = %e, "worker task did not complete");
                }
            }
        }

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        ctx.end_run(result.is_ok(), elapsed);
        match &result {
            Ok(_) => info!(elapsed_ms = elapsed, "reduce finished"),
            Err(e) => info!(elapsed_ms = elapsed, error = %e, "reduce failed"),
        }
        result
    }
}

/// Reduce `input` split into `shard_count` shards with at most
/// `max_concurrency` workers running at once.
///
/// # Example
///
/// ```rust
/// # tokio_test::block_on(async {
/// let total = parallel_reduce::reduce(
///     vec![7, 2, 8, -9, 4, 0],
///     2,
///     2,
///     |items: &[i64]| Ok::<i64, String>(items.iter().sum()),
///     |a, b| a + b,
///     None,
/// )
/// .await
/// .unwrap();
/// assert_eq!(total, 12);
/// # });
/// ```
pub async fn reduce<E, F, R, Err, C>(
    input: impl Into<Arc<[E]>>,
    shard_count: usize,
    max_concurrency: usize,
    reduce_fn: F,
    combine_fn: C,
    cancel: Option<&CancellationToken>,
) -> Result<R>
where
    E: Send + Sync + 'static,
    F: Fn(&[E]) -> std::result::Result<R, Err> + Send + Sync + 'static,
    R: Send + 'static,
    Err: fmt::Display,
    C: Fn(R, R) -> R + Send,
{
    let config = EngineConfig::new(shard_count).with_max_concurrency(max_concurrency);
    let engine = ReduceEngine::new(config)?;
    engine
        .reduce(input, Reduction::new(reduce_fn, combine_fn), cancel)
        .await
}

/// Run a reduction to completion on a private current-thread runtime.
///
/// Must not be called from inside an async context.
///
/// # Example
///
/// ```rust
/// use parallel_reduce::{reduce_blocking, EngineConfig, Reduction};
///
/// let longest = Reduction::new(
///     |words: &[String]| Ok::<usize, String>(words.iter().map(|w| w.len()).max().unwrap_or(0)),
///     usize::max,
/// );
/// let words: Vec<String> = ["shard", "worker", "aggregator", "hand-off"]
///     .iter()
///     .map(|w| w.to_string())
///     .collect();
/// let n = reduce_blocking(EngineConfig::new(2), words, longest, None).unwrap();
/// assert_eq!(n, 10);
/// ```
pub fn reduce_blocking<E, S, C>(
    config: EngineConfig,
    input: impl Into<Arc<[E]>>,
    reduction: Reduction<S, C, S::Output>,
    cancel: Option<&CancellationToken>,
) -> Result<S::Output>
where
    E: Send + Sync + 'static,
    S: ShardReducer<E>,
    C: Fn(S::Output, S::Output) -> S::Output + Send,
{
    let engine = ReduceEngine::new(config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    runtime.block_on(engine.reduce(input, reduction, cancel))
}
