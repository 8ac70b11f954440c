// SPDX-License-Identifier: Apache-2.0

//! The batching pipeline: single consumer of the record bus, producer of the
//! bounded batch channel.
//!
//! Batches leave when the buffer reaches `batch_size` or when the flush timer
//! fires with a non-empty buffer. Emission is bounded: a batch the output
//! channel cannot absorb within the deadline is dropped, which caps the
//! pipeline's memory under downstream failure.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::collectors::TaskResult;
use crate::record::Record;
use crate::telemetry::Telemetry;

#[derive(Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// How long an emission may block on the output channel before the batch
    /// is dropped.
    pub output_deadline: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            flush_interval: Duration::from_secs(10),
            output_deadline: Duration::from_secs(5),
        }
    }
}

pub struct Pipeline {
    receiver: BoundedReceiver<Record>,
    sender: BoundedSender<Vec<Record>>,
    config: BatchConfig,
    telemetry: Telemetry,
}

enum FlushResult {
    Sent,
    Dropped,
    Closed,
}

impl Pipeline {
    pub fn new(
        receiver: BoundedReceiver<Record>,
        sender: BoundedSender<Vec<Record>>,
        config: BatchConfig,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            receiver,
            sender,
            config,
            telemetry,
        }
    }

    pub async fn start(mut self, cancel: CancellationToken) -> TaskResult {
        info!(
            batch_size = self.config.batch_size,
            flush_interval = ?self.config.flush_interval,
            "Starting pipeline"
        );

        let mut buffer: Vec<Record> = Vec::with_capacity(self.config.batch_size);

        let mut flush_timer = tokio::time::interval(self.config.flush_interval);
        flush_timer.tick().await; // consume the immediate tick

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Pipeline received shutdown signal, flushing remaining records");
                    self.flush(&mut buffer).await;
                    return Ok(());
                }

                _ = flush_timer.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }

                item = self.receiver.next() => {
                    match item {
                        None => {
                            debug!("Record bus closed, flushing remaining records and exiting");
                            self.flush(&mut buffer).await;
                            return Ok(());
                        }
                        Some(record) => {
                            buffer.push(record);
                            if buffer.len() >= self.config.batch_size {
                                if let FlushResult::Closed = self.flush(&mut buffer).await {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn flush(&mut self, buffer: &mut Vec<Record>) -> FlushResult {
        if buffer.is_empty() {
            return FlushResult::Sent;
        }

        let batch = std::mem::replace(buffer, Vec::with_capacity(self.config.batch_size));
        let size = batch.len();

        match tokio::time::timeout(self.config.output_deadline, self.sender.send(batch)).await {
            Ok(Ok(())) => {
                debug!(size, "Flushed batch");
                self.telemetry.incr("pipeline.batches_flushed", 1);
                FlushResult::Sent
            }
            Ok(Err(_)) => {
                debug!(size, "Batch channel closed, dropping batch");
                FlushResult::Closed
            }
            Err(_) => {
                error!(
                    size,
                    deadline = ?self.config.output_deadline,
                    "Output channel blocked, dropping batch"
                );
                self.telemetry.incr("pipeline.batches_dropped", 1);
                FlushResult::Dropped
            }
        }
    }
}
