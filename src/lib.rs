//! # parallel-reduce
//!
//! A bounded-concurrency partition, execute, and aggregate engine.
//!
//! The input is split into contiguous shards, each shard is reduced by its own
//! worker, and the partial results are combined in shard-index order. Because
//! the combine order never depends on which worker finishes first, a run is
//! reproducible regardless of scheduling, timing, or core count.
//!
//! ## Core Concepts
//!
//! - **Shard**: A contiguous range of the input handed to one worker
//! - **ShardReducer**: The caller's reduction over one shard (any `Fn(&[E]) -> Result<R, Err>`)
//! - **Completion channel**: Where workers hand off their record, buffered or rendezvous
//! - **Dispatcher**: Launches workers while holding at most `max_concurrency` running
//! - **Aggregator**: Re-orders arriving records and folds them with `combine`
//! - **ReduceEngine**: Wires the above together behind `reduce`
//! - **ReduceContext**: Optional metrics and structured event trace for a run
//!
//! ## Example
//!
//! ```rust
//! use parallel_reduce::{EngineConfig, ReduceContext, ReduceEngine, Reduction};
//!
//! # tokio_test::block_on(async {
//! let config = EngineConfig::new(4).with_max_concurrency(2);
//! let engine = ReduceEngine::new(config).unwrap();
//!
//! let ctx = ReduceContext::new();
//! let total = engine
//!     .reduce_with_ctx(
//!         &ctx,
//!         (1..=100).collect::<Vec<u64>>(),
//!         Reduction::new(|items: &[u64]| Ok::<u64, String>(items.iter().sum()), |a, b| a + b),
//!         None,
//!     )
//!     .await
//!     .unwrap();
//!
//! assert_eq!(total, 5050);
//! assert_eq!(ctx.snapshot().shards_succeeded, 4);
//! # });
//! ```

pub mod error;
pub mod config;
pub mod context;
pub mod metrics;
pub mod events;
pub mod partition;
pub mod worker;
pub mod channel;
pub mod dispatcher;
pub mod aggregator;
pub mod engine;

pub use error::{Error, FailureKind, Result, ShardFailure};
pub use config::EngineConfig;
pub use context::ReduceContext;
pub use metrics::ReduceMetrics;
pub use events::{EngineEvent, TraceEntry};
pub use partition::{split, Shard};
pub use worker::{ShardReducer, WorkerState};
pub use channel::{ChannelMode, ShardOutcome, ShardRecord};
pub use engine::{reduce, reduce_blocking, ReduceEngine, Reduction};

// Re-exported so callers can build cancellation signals without a direct dependency.
pub use tokio_util::sync::CancellationToken;
