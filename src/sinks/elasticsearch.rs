// SPDX-License-Identifier: Apache-2.0

//! Elasticsearch output, contract level only: lifecycle and health are wired,
//! `send` acknowledges without shipping. The bulk-index encoding is the
//! documented follow-up.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use super::{Sink, SinkError};
use crate::collectors::HealthHandle;
use crate::config::SinkSpec;
use crate::record::{Record, RecordKind};

pub struct ElasticsearchSink {
    name: String,
    url: String,
    accepts: Vec<RecordKind>,
    health: HealthHandle,
}

impl ElasticsearchSink {
    pub fn new(spec: &SinkSpec) -> Self {
        let health = HealthHandle::new();
        health.set_detail("url", &spec.url);

        Self {
            name: spec.name.clone(),
            url: spec.url.clone(),
            accepts: super::parse_data_types(&spec.data_types),
            health,
        }
    }
}

impl Sink for ElasticsearchSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self) -> &[RecordKind] {
        &self.accepts
    }

    fn start(&self) {
        info!(sink = %self.name, url = %self.url, "Starting Elasticsearch output");
    }

    fn stop(&self) {
        info!(sink = %self.name, "Stopping Elasticsearch output");
    }

    fn send(&self, batch: Vec<Record>) -> BoxFuture<'_, Result<(), SinkError>> {
        async move {
            debug!(sink = %self.name, items = batch.len(), "Would send batch to Elasticsearch");
            Ok(())
        }
        .boxed()
    }

    fn health(&self) -> HealthHandle {
        self.health.clone()
    }
}
