// SPDX-License-Identifier: Apache-2.0

//! Batch destinations. The set is closed: http, elasticsearch, prometheus.
//! An unknown kind falls back to http so a typo degrades to the generic
//! JSON POST instead of dropping the output.

pub mod elasticsearch;
pub mod http;
pub mod prometheus;
pub mod retry;
pub mod tls;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::collectors::HealthHandle;
use crate::config::SinkSpec;
use crate::record::{Record, RecordKind};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("HTTP request failed with status {0}")]
    Status(u16),
}

/// A destination for batches. `send` owns encode + transport + bounded retry;
/// the fanout layer adds the per-sink deadline on top.
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Record kinds this sink accepts; empty means all.
    fn accepts(&self) -> &[RecordKind];

    fn start(&self) {}

    fn stop(&self) {}

    fn send(&self, batch: Vec<Record>) -> BoxFuture<'_, Result<(), SinkError>>;

    fn health(&self) -> HealthHandle;
}

/// Build a sink from its spec. Kinds are a closed set; anything unrecognized
/// gets the generic HTTP treatment.
pub fn build(spec: &SinkSpec) -> Result<Box<dyn Sink>, SinkError> {
    match spec.kind.as_str() {
        "elasticsearch" => Ok(Box::new(elasticsearch::ElasticsearchSink::new(spec))),
        "prometheus" => Ok(Box::new(prometheus::PrometheusSink::new(spec))),
        _ => Ok(Box::new(http::HttpSink::new(spec)?)),
    }
}

/// Parse the configured data-type names into kinds, ignoring unknowns.
pub fn parse_data_types(names: &[String]) -> Vec<RecordKind> {
    names
        .iter()
        .filter_map(|n| match n.as_str() {
            "log" | "logs" => Some(RecordKind::Log),
            "metric" | "metrics" => Some(RecordKind::Metric),
            "trace" | "traces" => Some(RecordKind::Trace),
            "event" | "events" => Some(RecordKind::Event),
            other => {
                tracing::warn!(data_type = other, "Unknown data type in sink filter, ignoring");
                None
            }
        })
        .collect()
}

/// Apply a sink's accepted-kind filter to a batch, preserving record order.
/// An empty filter accepts everything.
pub fn filter_batch(accepts: &[RecordKind], batch: Vec<Record>) -> Vec<Record> {
    if accepts.is_empty() {
        return batch;
    }
    batch
        .into_iter()
        .filter(|r| accepts.contains(&r.kind()))
        .collect()
}
