//! Structured engine events for tracing and observability.
//!
//! Every reduction run can record a timestamped log of what the dispatcher,
//! workers, and aggregator did. Events are typed and serializable so a trace
//! can be exported as JSON.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Events that can be emitted during a reduction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    /// A run has started.
    RunStart {
        /// Number of input items.
        input_len: usize,
        /// Number of shards the input was split into.
        shard_count: usize,
        /// Worker slots available to the dispatcher.
        max_concurrency: usize,
    },
    /// The dispatcher launched a worker for a shard.
    ShardDispatched {
        /// Index of the dispatched shard.
        shard_index: usize,
        /// Number of items in the shard.
        len: usize,
    },
    /// A worker produced its partial result.
    ShardCompleted {
        /// Index of the completed shard.
        shard_index: usize,
        /// Time spent inside the reduction function, in milliseconds.
        duration_ms: u64,
    },
    /// A worker's reduction failed.
    ShardFailed {
        /// Index of the failed shard.
        shard_index: usize,
        /// Error message describing what went wrong.
        message: String,
    },
    /// A worker finished after the aggregator stopped listening, so its
    /// outcome was dropped instead of collected.
    ShardDiscarded {
        /// Index of the shard whose outcome was dropped.
        shard_index: usize,
    },
    /// The run was cancelled before every shard reported.
    Cancelled {
        /// Number of shards whose outcome was never collected.
        outstanding: usize,
    },
    /// The run finished, successfully or not.
    RunEnd {
        /// Whether the run produced a combined value.
        success: bool,
        /// Wall-clock duration of the run in milliseconds.
        duration_ms: u64,
    },
}

/// A timestamped trace entry containing an engine event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Unix epoch timestamp in milliseconds when this event occurred.
    pub timestamp: u64,
    /// The engine event that was recorded.
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl TraceEntry {
    /// Create a new trace entry with the current timestamp.
    #[must_use]
    pub fn new(event: EngineEvent) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self { timestamp, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_entry_serialization() {
        let entry = TraceEntry::new(EngineEvent::ShardDispatched {
            shard_index: 2,
            len: 5,
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"ShardDispatched\""));
        assert!(json.contains("\"shard_index\":2"));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn test_trace_entry_reads_back_its_own_json() {
        let entry = TraceEntry::new(EngineEvent::ShardCompleted {
            shard_index: 1,
            duration_ms: 5,
        });

        let json = serde_json::to_string(&entry).unwrap();
        let back: TraceEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timestamp, entry.timestamp);
        assert_eq!(back.event, entry.event);
    }

    #[test]
    fn test_failure_event() {
        let event = EngineEvent::ShardFailed {
            shard_index: 2,
            message: "division by zero".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"ShardFailed\""));
        assert!(json.contains("\"message\":\"division by zero\""));

        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
