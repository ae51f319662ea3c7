//! Error types for reduction runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single shard failed to produce a partial result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The reduction function returned an error for this shard.
    Reduce,
    /// The reduction function panicked while processing this shard.
    Panicked,
}

/// The failure record a worker hands off instead of a partial result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFailure {
    /// Index of the shard that failed.
    pub shard_index: usize,
    /// What kind of failure occurred.
    pub kind: FailureKind,
    /// The rendered error or panic message.
    pub message: String,
}

impl ShardFailure {
    /// A failure reported by the reduction function itself.
    pub fn reduce(shard_index: usize, message: impl Into<String>) -> Self {
        Self {
            shard_index,
            kind: FailureKind::Reduce,
            message: message.into(),
        }
    }

    /// A failure caused by a panic inside the reduction function.
    pub fn panicked(shard_index: usize, message: impl Into<String>) -> Self {
        Self {
            shard_index,
            kind: FailureKind::Panicked,
            message: message.into(),
        }
    }
}

impl fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Reduce => write!(f, "shard {}: {}", self.shard_index, self.message),
            FailureKind::Panicked => {
                write!(f, "shard {} panicked: {}", self.shard_index, self.message)
            }
        }
    }
}

/// The main error type for reduction runs.
#[derive(Error, Debug)]
pub enum Error {
    /// The engine configuration was rejected before any worker started.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// One or more shards failed. Every failure is listed, in shard order.
    ///
    /// Only the indices of successful shards are kept here. Use
    /// [`ReduceEngine::partials`](crate::ReduceEngine::partials) to get the
    /// successful values alongside the failures.
    #[error("{} shard(s) failed: {}", .failures.len(), join_failures(.failures))]
    Aggregate {
        /// Every failed shard, in shard-index order.
        failures: Vec<ShardFailure>,
        /// Indices of the shards that completed successfully.
        succeeded: Vec<usize>,
    },

    /// The run was cancelled before every shard was accounted for.
    #[error(
        "Reduction {} with {} shard(s) completed and {} outstanding",
        cancel_verb(.timed_out),
        .completed.len(),
        .outstanding.len()
    )]
    Cancelled {
        /// Shards whose outcome had been received, in shard-index order.
        completed: Vec<usize>,
        /// Shards whose outcome had not been received, in shard-index order.
        outstanding: Vec<usize>,
        /// Whether the cancellation came from the configured deadline.
        timed_out: bool,
    },

    /// The completion channel closed before every shard reported.
    #[error("Completion channel closed after {received} of {expected} shard(s)")]
    ChannelClosed {
        /// Number of records received before the channel closed.
        received: usize,
        /// Number of records the aggregator was waiting for.
        expected: usize,
    },

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking wrapper could not start its runtime.
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this error is a cancellation (explicit or deadline).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// The per-shard failures carried by an [`Error::Aggregate`], if any.
    pub fn shard_failures(&self) -> &[ShardFailure] {
        match self {
            Error::Aggregate { failures, .. } => failures,
            _ => &[],
        }
    }
}

fn cancel_verb(timed_out: &bool) -> &'static str {
    if *timed_out {
        "timed out"
    } else {
        "cancelled"
    }
}

fn join_failures(failures: &[ShardFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A specialized `Result` type for reduction runs.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = Error::Aggregate {
            failures: vec![
                ShardFailure::reduce(1, "bad input"),
                ShardFailure::panicked(3, "overflow"),
            ],
            succeeded: vec![0, 2],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("2 shard(s) failed"));
        assert!(msg.contains("shard 1: bad input"));
        assert!(msg.contains("shard 3 panicked: overflow"));
        assert_eq!(err.shard_failures().len(), 2);
    }

    #[test]
    fn test_cancelled_message_reports_outstanding() {
        let err = Error::Cancelled {
            completed: vec![0],
            outstanding: vec![1, 2],
            timed_out: true,
        };

        assert!(err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "Reduction timed out with 1 shard(s) completed and 2 outstanding"
        );
    }
}
