// SPDX-License-Identifier: Apache-2.0

//! Bounded channels between pipeline stages.
//!
//! The record bus (collectors → pipeline) and the batch channel (pipeline →
//! fan-out) are both instances of this wrapper. Capacity is fixed at
//! construction, which is what gives every producer a natural backpressure
//! point: the tailer probes with [`BoundedSender::try_send`] and only then
//! falls back to a bounded wait on [`BoundedSender::send_async`].

use flume::r#async::SendFut;
use flume::{Receiver, Sender, TrySendError};
use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    /// Channel is at capacity (try_send only).
    Full,
    /// Receiver closed; the consumer side has shut down.
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Full => write!(f, "channel full"),
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

/// Producer half. Cloned across collectors for the record bus; the batch
/// channel keeps a single one inside the pipeline.
pub struct BoundedSender<T> {
    tx: Sender<T>,
}

impl<T> BoundedSender<T> {
    /// Wait for capacity. Used where blocking the producer is acceptable,
    /// e.g. the metrics sampler between ticks.
    pub async fn send(&self, record: T) -> Result<(), SendError> {
        self.tx
            .send_async(record)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Non-blocking send. The record comes back on failure so the caller can
    /// hold it for a retry or drop it deliberately.
    pub fn try_send(&self, record: T) -> Result<(), (SendError, T)> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(record)) => Err((SendError::Full, record)),
            Err(TrySendError::Disconnected(record)) => Err((SendError::Disconnected, record)),
        }
    }

    /// The raw send future, for callers that bound the wait themselves.
    pub fn send_async(&self, record: T) -> SendFut<'_, T> {
        self.tx.send_async(record)
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Consumer half: exactly one per channel in this agent.
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// None once every sender has been dropped, which is how the pipeline
    /// and the fan-out learn the stage above them has finished.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive. None when empty or disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

pub fn bounded<T>(capacity: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(capacity);

    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{bounded, SendError};
    use tokio_test::{assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn records_arrive_in_order_until_senders_drop() {
        let (tx, mut rx) = bounded(8);
        let tx2 = tx.clone();

        tx.send("a").await.unwrap();
        tx2.send("b").await.unwrap();
        drop(tx);
        drop(tx2);

        assert_eq!(rx.next().await, Some("a"));
        assert_eq!(rx.next().await, Some("b"));
        // All producers gone: the consumer sees the close.
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn send_fails_once_consumer_is_gone() {
        let (tx, rx) = bounded(1);
        drop(rx);

        assert_eq!(tx.send(1).await, Err(SendError::Disconnected));
    }

    #[test]
    fn try_send_reports_full_and_returns_the_record() {
        let (tx, rx) = bounded(1);

        assert!(tx.try_send(1).is_ok());

        match tx.try_send(2) {
            Err((SendError::Full, record)) => assert_eq!(2, record),
            other => panic!("expected Full, got {:?}", other.map(|_| ())),
        }

        drop(rx);
        match tx.try_send(3) {
            Err((SendError::Disconnected, record)) => assert_eq!(3, record),
            other => panic!("expected Disconnected, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn full_channel_parks_the_sender_until_a_record_is_taken() {
        // The backpressure protocol relies on a send into a full channel
        // suspending rather than erroring.
        let (tx, mut rx) = bounded(1);
        tx.send(1).await.unwrap();

        let mut blocked = spawn(tx.send_async(2));
        assert_pending!(blocked.poll());

        assert_eq!(Some(1), rx.next().await);
        assert_ready!(blocked.poll()).unwrap();

        assert_eq!(Some(2), rx.next().await);
    }
}
