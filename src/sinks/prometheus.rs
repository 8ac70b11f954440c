// SPDX-License-Identifier: Apache-2.0

//! Prometheus pushgateway output, contract level only: lifecycle and health
//! are wired, `send` acknowledges without pushing.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use super::{Sink, SinkError};
use crate::collectors::HealthHandle;
use crate::config::SinkSpec;
use crate::record::{Record, RecordKind};

pub struct PrometheusSink {
    name: String,
    url: String,
    accepts: Vec<RecordKind>,
    health: HealthHandle,
}

impl PrometheusSink {
    pub fn new(spec: &SinkSpec) -> Self {
        let health = HealthHandle::new();
        health.set_detail("url", &spec.url);

        // A pushgateway only takes metrics; default the filter accordingly.
        let accepts = if spec.data_types.is_empty() {
            vec![RecordKind::Metric]
        } else {
            super::parse_data_types(&spec.data_types)
        };

        Self {
            name: spec.name.clone(),
            url: spec.url.clone(),
            accepts,
            health,
        }
    }
}

impl Sink for PrometheusSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self) -> &[RecordKind] {
        &self.accepts
    }

    fn start(&self) {
        info!(sink = %self.name, url = %self.url, "Starting Prometheus output");
    }

    fn stop(&self) {
        info!(sink = %self.name, "Stopping Prometheus output");
    }

    fn send(&self, batch: Vec<Record>) -> BoxFuture<'_, Result<(), SinkError>> {
        async move {
            debug!(sink = %self.name, items = batch.len(), "Would push metrics to Prometheus");
            Ok(())
        }
        .boxed()
    }

    fn health(&self) -> HealthHandle {
        self.health.clone()
    }
}
