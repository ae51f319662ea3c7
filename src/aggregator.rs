//! Aggregator: collects one record per shard and combines them in shard order.
//!
//! Records arrive in completion order. Early arrivals wait in a re-ordering
//! buffer until every lower-indexed shard has been seen, so `combine` is
//! always applied as `((r0 + r1) + r2) + ...` regardless of scheduling.
//! The aggregator is the only owner of this state; nothing here is shared.
//! When given a [`ReduceContext`], it counts a shard as succeeded or failed
//! at the moment it accepts that shard's record, so counts always agree with
//! what was collected.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{CompletionReceiver, ShardOutcome, ShardRecord};
use crate::context::ReduceContext;
use crate::error::ShardFailure;
use crate::{Error, Result};

/// Re-ordering buffer and progress cursor for one run.
pub struct Aggregator<R> {
    expected: usize,
    received: Vec<bool>,
    pending: BTreeMap<usize, ShardOutcome<R>>,
    cursor: usize,
    ctx: Option<ReduceContext>,
}

impl<R> Aggregator<R> {
    /// Create an aggregator waiting for `expected` shards.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            received: vec![false; expected],
            pending: BTreeMap::new(),
            cursor: 0,
            ctx: None,
        }
    }

    /// Record every accepted outcome into `ctx`.
    #[must_use]
    pub fn with_context(mut self, ctx: ReduceContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Number of shards this aggregator waits for.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Returns `true` once every shard has been released in order.
    pub fn is_complete(&self) -> bool {
        self.cursor == self.expected
    }

    /// Number of records accepted so far.
    pub fn received_count(&self) -> usize {
        self.received.iter().filter(|seen| **seen).count()
    }

    /// Store a record by its shard index.
    ///
    /// Records for unknown shards and duplicates are discarded; the first
    /// record for a shard is the one that counts.
    pub fn accept(&mut self, record: ShardRecord<R>) {
        let index = record.shard_index;
        match self.received.get_mut(index) {
            Some(seen) if !*seen => {
                *seen = true;
                if let Some(ctx) = &self.ctx {
                    match &record.outcome {
                        Ok(_) => ctx.record_success(index, record.elapsed_ms),
                        Err(failure) => ctx.record_failure(failure),
                    }
                }
                self.pending.insert(index, record.outcome);
            }
            Some(_) => warn!(shard = index, "duplicate record discarded"),
            None => warn!(
                shard = index,
                expected = self.expected,
                "record for unknown shard discarded"
            ),
        }
    }

    /// Release the record at the cursor, if it has arrived, and advance.
    pub fn next_ready(&mut self) -> Option<(usize, ShardOutcome<R>)> {
        let outcome = self.pending.remove(&self.cursor)?;
        let index = self.cursor;
        self.cursor += 1;
        Some((index, outcome))
    }

    fn cancelled(&self) -> Error {
        let (completed, outstanding): (Vec<usize>, Vec<usize>) =
            (0..self.expected).partition(|i| self.received[*i]);
        Error::Cancelled {
            completed,
            outstanding,
            timed_out: false,
        }
    }

    /// Wait for one more record and buffer it.
    async fn receive_one(
        &mut self,
        rx: &mut CompletionReceiver<R>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled()),
            record = rx.recv() => record,
        };
        match record {
            Some(record) => {
                debug!(shard = record.shard_index, ok = record.is_success(), "record received");
                self.accept(record);
                Ok(())
            }
            None => Err(Error::ChannelClosed {
                received: self.received_count(),
                expected: self.expected,
            }),
        }
    }

    /// Drain the channel and fold every partial result with `combine`, in
    /// shard-index order.
    ///
    /// The accumulator starts from the first successful shard's value. If any
    /// shard failed, every failure is reported in an [`Error::Aggregate`]
    /// once all shards are accounted for. If `cancel` fires first, the
    /// result is [`Error::Cancelled`] listing completed and outstanding shards.
    pub async fn collect<C>(
        mut self,
        mut rx: CompletionReceiver<R>,
        combine: C,
        cancel: CancellationToken,
    ) -> Result<R>
    where
        C: Fn(R, R) -> R,
    {
        let mut acc: Option<R> = None;
        let mut failures: Vec<ShardFailure> = Vec::new();
        let mut succeeded: Vec<usize> = Vec::new();

        while !self.is_complete() {
            self.receive_one(&mut rx, &cancel).await?;
            while let Some((index, outcome)) = self.next_ready() {
                match outcome {
                    Ok(value) => {
                        succeeded.push(index);
                        acc = Some(match acc {
                            Some(prev) => combine(prev, value),
                            None => value,
                        });
                    }
                    Err(failure) => failures.push(failure),
                }
            }
        }

        if !failures.is_empty() {
            return Err(Error::Aggregate {
                failures,
                succeeded,
            });
        }
        acc.ok_or_else(|| Error::ChannelClosed {
            received: self.received_count(),
            expected: self.expected,
        })
    }

    /// Drain the channel and return every shard's outcome in shard-index
    /// order, without combining and without failing on shard errors.
    pub async fn collect_outcomes(
        mut self,
        mut rx: CompletionReceiver<R>,
        cancel: CancellationToken,
    ) -> Result<Vec<ShardOutcome<R>>> {
        let mut outcomes = Vec::with_capacity(self.expected);
        while !self.is_complete() {
            self.receive_one(&mut rx, &cancel).await?;
            while let Some((_, outcome)) = self.next_ready() {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{completion_channel, ChannelMode, CompletionSink};

    #[test]
    fn test_out_of_order_records_are_released_in_shard_order() {
        let mut agg = Aggregator::new(3);
        agg.accept(ShardRecord::success(2, "c"));
        assert!(agg.next_ready().is_none());

        agg.accept(ShardRecord::success(0, "a"));
        assert_eq!(agg.next_ready().map(|(i, _)| i), Some(0));
        assert!(agg.next_ready().is_none());

        agg.accept(ShardRecord::success(1, "b"));
        let rest: Vec<usize> = std::iter::from_fn(|| agg.next_ready()).map(|(i, _)| i).collect();
        assert_eq!(rest, vec![1, 2]);
        assert!(agg.is_complete());
    }

    #[test]
    fn test_duplicates_and_unknown_shards_are_ignored() {
        let mut agg = Aggregator::new(2);
        agg.accept(ShardRecord::success(0, 1));
        agg.accept(ShardRecord::success(0, 99));
        agg.accept(ShardRecord::success(7, 5));
        assert_eq!(agg.received_count(), 1);
        assert_eq!(agg.next_ready().unwrap().1.unwrap(), 1);
    }

    #[test]
    fn test_context_counts_only_accepted_records() {
        let ctx = ReduceContext::new();
        let mut agg = Aggregator::new(3).with_context(ctx.clone());
        agg.accept(ShardRecord::success(0, 1).with_elapsed_ms(4));
        agg.accept(ShardRecord::success(0, 2));
        agg.accept(ShardRecord::failure(ShardFailure::reduce(2, "bad")));

        let metrics = ctx.snapshot();
        assert_eq!(metrics.shards_succeeded, 1);
        assert_eq!(metrics.shards_failed, 1);
        assert_eq!(metrics.failures, vec!["shard 2: bad".to_string()]);
    }

    #[tokio::test]
    async fn test_collect_combines_in_shard_order() {
        let (tx, rx) = completion_channel::<String>(ChannelMode::Buffered(3));
        for (i, s) in [(2, "c"), (0, "a"), (1, "b")] {
            assert!(tx.deliver(ShardRecord::success(i, s.to_string())).await);
        }

        // Concatenation is not commutative, so order is observable.
        let out = Aggregator::new(3)
            .collect(rx, |a, b| a + &b, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "abc");
    }

    #[tokio::test]
    async fn test_collect_reports_all_failures() {
        let (tx, rx) = completion_channel::<i32>(ChannelMode::Buffered(4));
        assert!(tx.deliver(ShardRecord::failure(ShardFailure::reduce(3, "x"))).await);
        assert!(tx.deliver(ShardRecord::success(0, 1)).await);
        assert!(tx.deliver(ShardRecord::failure(ShardFailure::reduce(1, "y"))).await);
        assert!(tx.deliver(ShardRecord::success(2, 3)).await);

        let err = Aggregator::new(4)
            .collect(rx, |a, b| a + b, CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Aggregate { failures, succeeded } => {
                let failed: Vec<usize> = failures.iter().map(|f| f.shard_index).collect();
                assert_eq!(failed, vec![1, 3]);
                assert_eq!(succeeded, vec![0, 2]);
            }
            other => panic!("expected Aggregate error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_reports_completed_and_outstanding() {
        let (tx, rx) = completion_channel::<i32>(ChannelMode::Buffered(3));
        assert!(tx.deliver(ShardRecord::success(1, 10)).await);

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = Aggregator::new(3)
            .collect(rx, |a, b| a + b, token)
            .await
            .unwrap_err();

        match err {
            Error::Cancelled { completed, outstanding, timed_out } => {
                assert_eq!(completed, vec![1]);
                assert_eq!(outstanding, vec![0, 2]);
                assert!(!timed_out);
            }
            other => panic!("expected Cancelled error, got {other:?}"),
        }
        drop(tx);
    }

    #[tokio::test]
    async fn test_closed_channel_is_reported() {
        let (tx, rx) = completion_channel::<i32>(ChannelMode::Buffered(2));
        assert!(tx.deliver(ShardRecord::success(0, 1)).await);
        drop(tx);

        let err = Aggregator::new(2)
            .collect(rx, |a, b| a + b, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelClosed { received: 1, expected: 2 }));
    }

    #[tokio::test]
    async fn test_collect_outcomes_keeps_failures_inline() {
        let (tx, rx) = completion_channel::<i32>(ChannelMode::Buffered(3));
        assert!(tx.deliver(ShardRecord::success(2, 30)).await);
        assert!(tx.deliver(ShardRecord::failure(ShardFailure::reduce(1, "bad"))).await);
        assert!(tx.deliver(ShardRecord::success(0, 10)).await);

        let outcomes = Aggregator::new(3)
            .collect_outcomes(rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes[0].as_ref().unwrap(), &10);
        assert!(outcomes[1].is_err());
        assert_eq!(outcomes[2].as_ref().unwrap(), &30);
    }
}
