//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelMode;
use crate::{Error, Result};

/// Settings for a [`ReduceEngine`](crate::ReduceEngine) run.
///
/// Missing fields fall back to their defaults when deserialized, so a
/// config file only needs to name what it changes.
///
/// # Example
///
/// ```rust
/// use parallel_reduce::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{ "shard_count": 8, "max_concurrency": 2 }"#).unwrap();
/// assert_eq!(config.effective_concurrency(), 2);
/// assert!(config.buffered);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of shards the input is split into.
    pub shard_count: usize,
    /// Upper bound on simultaneously running workers. `None` means one per shard.
    pub max_concurrency: Option<usize>,
    /// Buffer completed results (`true`) or hand each one off synchronously.
    pub buffered: bool,
    /// Cancel the run once this many milliseconds have elapsed.
    pub timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            max_concurrency: None,
            buffered: true,
            timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Create a config with `shard_count` shards and one worker slot per shard.
    pub fn new(shard_count: usize) -> Self {
        Self {
            shard_count,
            ..Self::default()
        }
    }

    /// Parse a config from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Cap the number of concurrently running workers.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Enable or disable buffering on the completion channel.
    pub fn with_buffering(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    /// Cancel the run after `timeout` has elapsed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Reject configurations no run could satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(Error::InvalidArgument(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(Error::InvalidArgument(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker slots actually used: `max_concurrency` clamped to `shard_count`.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency
            .map_or(self.shard_count, |max| max.min(self.shard_count))
            .max(1)
    }

    /// Completion channel mode derived from `buffered` and the concurrency bound.
    pub fn channel_mode(&self) -> ChannelMode {
        if self.buffered {
            ChannelMode::Buffered(self.effective_concurrency())
        } else {
            ChannelMode::Rendezvous
        }
    }

    /// The configured deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
