//! Completion channel carrying partial results from workers to the aggregator.
//!
//! Many workers hold a [`CompletionSender`]; exactly one aggregator holds the
//! [`CompletionReceiver`]. Records arrive in completion order, which is
//! unrelated to shard order; the `shard_index` on each record is what lets the
//! aggregator restore shard order.
//!
//! Two hand-off modes are supported:
//!
//! - [`ChannelMode::Buffered`]: a send completes as soon as a buffer slot is free.
//! - [`ChannelMode::Rendezvous`]: a send completes only once the aggregator has
//!   taken the record out of the channel.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::ShardFailure;

/// A shard's outcome: its partial result, or the failure that replaced it.
pub type ShardOutcome<R> = std::result::Result<R, ShardFailure>;

/// What a worker hands off: exactly one per shard.
#[derive(Debug)]
pub struct ShardRecord<R> {
    /// Index of the shard this record belongs to.
    pub shard_index: usize,
    /// The partial result or failure for that shard.
    pub outcome: ShardOutcome<R>,
    /// Time the reduction ran for, in milliseconds.
    pub elapsed_ms: u64,
}

impl<R> ShardRecord<R> {
    /// A successful partial result.
    pub fn success(shard_index: usize, value: R) -> Self {
        Self {
            shard_index,
            outcome: Ok(value),
            elapsed_ms: 0,
        }
    }

    /// A failure record.
    pub fn failure(failure: ShardFailure) -> Self {
        Self {
            shard_index: failure.shard_index,
            outcome: Err(failure),
            elapsed_ms: 0,
        }
    }

    /// Attach the reduction's running time.
    #[must_use]
    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    /// Returns `true` if this record carries a partial result.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// How the completion channel hands records to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Up to `n` records may wait in the channel before senders block.
    Buffered(usize),
    /// Zero-capacity hand-off: every send waits for the matching receive.
    Rendezvous,
}

struct Envelope<R> {
    record: ShardRecord<R>,
    ack: Option<oneshot::Sender<()>>,
}

/// Anything a worker can deliver its record to.
///
/// Returns `true` if the record was accepted, `false` if the receiving side
/// has gone away.
#[async_trait]
pub trait CompletionSink<R>: Clone + Send + Sync + 'static {
    /// Hand off a record, waiting as the channel mode requires.
    async fn deliver(&self, record: ShardRecord<R>) -> bool;
}

/// The worker side of the completion channel.
pub struct CompletionSender<R> {
    tx: mpsc::Sender<Envelope<R>>,
    rendezvous: bool,
}

impl<R> Clone for CompletionSender<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rendezvous: self.rendezvous,
        }
    }
}

#[async_trait]
impl<R> CompletionSink<R> for CompletionSender<R>
where
    R: Send + 'static,
{
    async fn deliver(&self, record: ShardRecord<R>) -> bool {
        if !self.rendezvous {
            return self.tx.send(Envelope { record, ack: None }).await.is_ok();
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let envelope = Envelope {
            record,
            ack: Some(ack_tx),
        };
        if self.tx.send(envelope).await.is_err() {
            return false;
        }
        // Dropped unacknowledged if the receiver goes away with the record still queued.
        ack_rx.await.is_ok()
    }
}

/// The aggregator side of the completion channel.
pub struct CompletionReceiver<R> {
    rx: mpsc::Receiver<Envelope<R>>,
}

impl<R> CompletionReceiver<R> {
    /// Wait for the next record. Returns `None` once every sender is gone
    /// and the channel is empty.
    pub async fn recv(&mut self) -> Option<ShardRecord<R>> {
        let envelope = self.rx.recv().await?;
        if let Some(ack) = envelope.ack {
            // The sender may have stopped waiting; nothing to do if so.
            let _ = ack.send(());
        }
        Some(envelope.record)
    }

    /// Stop accepting new records. Already-queued records can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Create a completion channel in the given mode.
///
/// # Example
///
/// ```rust
/// use parallel_reduce::channel::{completion_channel, ChannelMode, CompletionSink, ShardRecord};
///
/// # tokio_test::block_on(async {
/// let (tx, mut rx) = completion_channel::<i32>(ChannelMode::Buffered(2));
/// assert!(tx.deliver(ShardRecord::success(0, 17)).await);
///
/// let record = rx.recv().await.unwrap();
/// assert_eq!(record.shard_index, 0);
/// assert_eq!(record.outcome.unwrap(), 17);
/// # });
/// ```
pub fn completion_channel<R>(mode: ChannelMode) -> (CompletionSender<R>, CompletionReceiver<R>) {
    let (capacity, rendezvous) = match mode {
        ChannelMode::Buffered(capacity) => (capacity.max(1), false),
        // tokio's mpsc needs a slot; the ack makes the hand-off synchronous.
        ChannelMode::Rendezvous => (1, true),
    };
    let (tx, rx) = mpsc::channel(capacity);
    (CompletionSender { tx, rendezvous }, CompletionReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_buffered_send_completes_without_receiver_activity() {
        let (tx, mut rx) = completion_channel::<u32>(ChannelMode::Buffered(2));
        assert!(tx.deliver(ShardRecord::success(1, 10)).await);
        assert!(tx.deliver(ShardRecord::success(0, 20)).await);

        // Completion order is preserved; shard order is not.
        assert_eq!(rx.recv().await.unwrap().shard_index, 1);
        assert_eq!(rx.recv().await.unwrap().shard_index, 0);
    }

    #[tokio::test]
    async fn test_buffered_send_blocks_when_full() {
        let (tx, mut rx) = completion_channel::<u32>(ChannelMode::Buffered(1));
        assert!(tx.deliver(ShardRecord::success(0, 1)).await);

        let blocked = tokio::spawn({
            let tx = tx.clone();
            async move { tx.deliver(ShardRecord::success(1, 2)).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.unwrap().shard_index, 0);
        assert!(blocked.await.unwrap());
        assert_eq!(rx.recv().await.unwrap().shard_index, 1);
    }

    #[tokio::test]
    async fn test_rendezvous_send_waits_for_receive() {
        let (tx, mut rx) = completion_channel::<u32>(ChannelMode::Rendezvous);

        let sender = tokio::spawn(async move { tx.deliver(ShardRecord::success(3, 9)).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!sender.is_finished(), "rendezvous send must wait for the receiver");

        let record = rx.recv().await.unwrap();
        assert_eq!(record.shard_index, 3);
        assert!(sender.await.unwrap());
    }

    #[tokio::test]
    async fn test_deliver_reports_dropped_receiver() {
        let (tx, rx) = completion_channel::<u32>(ChannelMode::Rendezvous);
        drop(rx);
        assert!(!tx.deliver(ShardRecord::success(0, 1)).await);
    }

    #[tokio::test]
    async fn test_failure_records_keep_their_shard_index() {
        let (tx, mut rx) = completion_channel::<u32>(ChannelMode::Buffered(1));
        assert!(tx.deliver(ShardRecord::failure(ShardFailure::reduce(4, "nope"))).await);
        drop(tx);

        let record = rx.recv().await.unwrap();
        assert_eq!(record.shard_index, 4);
        assert!(!record.is_success());
        assert!(rx.recv().await.is_none());
    }
}
