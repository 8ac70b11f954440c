// SPDX-License-Identifier: Apache-2.0

//! Batch fan-out: a single dispatcher consumes batches FIFO from the
//! pipeline and sends each to every enabled sink concurrently.
//!
//! One short-lived task per sink per batch, each bounded by the per-sink
//! deadline. The dispatcher waits for the full set under an outer deadline;
//! stragglers are detached rather than cancelled so their own deadline still
//! governs them. A failing or slow sink never delays the next batch for the
//! healthy ones.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::collectors::TaskResult;
use crate::record::Record;
use crate::sinks::{filter_batch, Sink};

/// Deadline for a single sink to accept one batch.
const SINK_SEND_DEADLINE: Duration = Duration::from_secs(30);

/// Deadline for the whole batch across all sinks.
const BATCH_DEADLINE: Duration = Duration::from_secs(45);

pub struct FanOut {
    receiver: BoundedReceiver<Vec<Record>>,
    sinks: Vec<Arc<dyn Sink>>,
    per_sink_deadline: Duration,
    batch_deadline: Duration,
}

impl FanOut {
    pub fn new(receiver: BoundedReceiver<Vec<Record>>, sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            receiver,
            sinks,
            per_sink_deadline: SINK_SEND_DEADLINE,
            batch_deadline: BATCH_DEADLINE,
        }
    }

    #[cfg(test)]
    fn with_deadlines(mut self, per_sink: Duration, batch: Duration) -> Self {
        self.per_sink_deadline = per_sink;
        self.batch_deadline = batch;
        self
    }

    pub async fn start(mut self, cancel: CancellationToken) -> TaskResult {
        info!(sinks = self.sinks.len(), "Starting data distribution");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Distribution received shutdown signal");
                    return Ok(());
                }

                batch = self.receiver.next() => {
                    match batch {
                        None => {
                            debug!("Batch channel closed, distribution exiting");
                            return Ok(());
                        }
                        Some(batch) if batch.is_empty() => {}
                        Some(batch) => self.dispatch(batch).await,
                    }
                }
            }
        }
    }

    async fn dispatch(&self, batch: Vec<Record>) {
        let size = batch.len();
        let mut tasks: JoinSet<()> = JoinSet::new();

        // Every sink but the last gets a filtered clone; the last consumes
        // the original.
        let mut batch = Some(batch);
        for (i, sink) in self.sinks.iter().enumerate() {
            let own = if i == self.sinks.len() - 1 {
                batch.take().unwrap_or_default()
            } else {
                batch.clone().unwrap_or_default()
            };

            let filtered = filter_batch(sink.accepts(), own);
            if filtered.is_empty() {
                continue;
            }

            let sink = sink.clone();
            let deadline = self.per_sink_deadline;
            let items = filtered.len();

            tasks.spawn(async move {
                match tokio::time::timeout(deadline, sink.send(filtered)).await {
                    Err(_) => {
                        warn!(sink = sink.name(), items, "Sink timed out sending batch");
                    }
                    Ok(Err(e)) => {
                        error!(sink = sink.name(), items, error = %e, "Failed to send batch to output");
                    }
                    Ok(Ok(())) => {
                        debug!(sink = sink.name(), items, "Successfully sent batch to output");
                    }
                }
            });
        }

        let stop_at = Instant::now() + self.batch_deadline;
        loop {
            match timeout_at(stop_at, tasks.join_next()).await {
                Ok(None) => break,
                Ok(Some(_)) => {}
                Err(_) => {
                    warn!(size, "Some outputs timed out while sending batch");
                    // Leave stragglers to their per-sink deadline.
                    tasks.detach_all();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::collectors::HealthHandle;
    use crate::record::{now_rfc3339, MetricKind, RecordKind};
    use crate::sinks::SinkError;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use serde_json::Map;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn log(msg: &str) -> Record {
        Record::Log {
            source: "/tmp/a.log".to_string(),
            message: msg.to_string(),
            timestamp: now_rfc3339(),
            level: "info".to_string(),
            fields: Map::new(),
        }
    }

    fn metric() -> Record {
        Record::Metric {
            name: "m".to_string(),
            kind: MetricKind::Gauge,
            value: 0.0,
            labels: BTreeMap::new(),
            unit: "count".to_string(),
            timestamp: now_rfc3339(),
        }
    }

    struct MockSink {
        name: String,
        accepts: Vec<RecordKind>,
        delay: Duration,
        received: Arc<Mutex<Vec<Vec<Record>>>>,
        health: HealthHandle,
    }

    impl MockSink {
        fn new(name: &str) -> (Arc<Self>, Arc<Mutex<Vec<Vec<Record>>>>) {
            let received = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::new(Self {
                name: name.to_string(),
                accepts: Vec::new(),
                delay: Duration::ZERO,
                received: received.clone(),
                health: HealthHandle::new(),
            });
            (sink, received)
        }

        fn slow(name: &str, delay: Duration) -> (Arc<Self>, Arc<Mutex<Vec<Vec<Record>>>>) {
            let received = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::new(Self {
                name: name.to_string(),
                accepts: Vec::new(),
                delay,
                received: received.clone(),
                health: HealthHandle::new(),
            });
            (sink, received)
        }

        fn filtered(name: &str, accepts: Vec<RecordKind>) -> (Arc<Self>, Arc<Mutex<Vec<Vec<Record>>>>) {
            let received = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::new(Self {
                name: name.to_string(),
                accepts,
                delay: Duration::ZERO,
                received: received.clone(),
                health: HealthHandle::new(),
            });
            (sink, received)
        }
    }

    impl Sink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn accepts(&self) -> &[RecordKind] {
            &self.accepts
        }

        fn send(&self, batch: Vec<Record>) -> BoxFuture<'_, Result<(), SinkError>> {
            async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.received.lock().unwrap().push(batch);
                Ok(())
            }
            .boxed()
        }

        fn health(&self) -> HealthHandle {
            self.health.clone()
        }
    }

    #[tokio::test]
    async fn every_sink_receives_every_batch_in_order() {
        let (tx, rx) = bounded(10);
        let (sink_a, recv_a) = MockSink::new("a");
        let (sink_b, recv_b) = MockSink::new("b");

        let fanout = FanOut::new(rx, vec![sink_a, sink_b]);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(fanout.start(cancel));

        tx.send(vec![log("1"), log("2")]).await.unwrap();
        tx.send(vec![log("3")]).await.unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();

        for recv in [recv_a, recv_b] {
            let batches = recv.lock().unwrap();
            assert_eq!(batches.len(), 2);
            assert_eq!(batches[0].len(), 2);
            assert_eq!(batches[1].len(), 1);
            // Record order within the batch is preserved end-to-end.
            match (&batches[0][0], &batches[0][1]) {
                (Record::Log { message: m1, .. }, Record::Log { message: m2, .. }) => {
                    assert_eq!(m1, "1");
                    assert_eq!(m2, "2");
                }
                other => panic!("unexpected records: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn data_type_filter_is_per_sink() {
        let (tx, rx) = bounded(10);
        let (logs_sink, logs_recv) = MockSink::filtered("logs", vec![RecordKind::Log]);
        let (all_sink, all_recv) = MockSink::new("all");

        let fanout = FanOut::new(rx, vec![logs_sink, all_sink]);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(fanout.start(cancel));

        tx.send(vec![log("1"), metric(), log("2")]).await.unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();

        let logs_batches = logs_recv.lock().unwrap();
        assert_eq!(logs_batches[0].len(), 2);

        let all_batches = all_recv.lock().unwrap();
        assert_eq!(all_batches[0].len(), 3);
    }

    #[tokio::test]
    async fn slow_sink_does_not_delay_next_batch_for_healthy_sink() {
        let (tx, rx) = bounded(10);
        let (fast, fast_recv) = MockSink::new("fast");
        // Slower than the per-sink deadline: every send times out.
        let (slow, _slow_recv) = MockSink::slow("slow", Duration::from_secs(60));

        let fanout = FanOut::new(rx, vec![fast, slow])
            .with_deadlines(Duration::from_millis(50), Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(fanout.start(cancel));

        let started = std::time::Instant::now();
        tx.send(vec![log("1")]).await.unwrap();
        tx.send(vec![log("2")]).await.unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();
        let elapsed = started.elapsed();

        let batches = fast_recv.lock().unwrap();
        assert_eq!(batches.len(), 2);
        // Two batches bounded by two batch deadlines, not by the slow sink.
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn sink_error_does_not_affect_others() {
        struct FailingSink {
            health: HealthHandle,
        }

        impl Sink for FailingSink {
            fn name(&self) -> &str {
                "failing"
            }
            fn accepts(&self) -> &[RecordKind] {
                &[]
            }
            fn send(&self, _batch: Vec<Record>) -> BoxFuture<'_, Result<(), SinkError>> {
                async { Err(SinkError::Status(500)) }.boxed()
            }
            fn health(&self) -> HealthHandle {
                self.health.clone()
            }
        }

        let (tx, rx) = bounded(10);
        let (healthy, healthy_recv) = MockSink::new("healthy");
        let failing = Arc::new(FailingSink {
            health: HealthHandle::new(),
        });

        let fanout = FanOut::new(rx, vec![failing, healthy]);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(fanout.start(cancel));

        tx.send(vec![log("1")]).await.unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();

        assert_eq!(healthy_recv.lock().unwrap().len(), 1);
    }
}
