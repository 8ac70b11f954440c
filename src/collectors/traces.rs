// SPDX-License-Identifier: Apache-2.0

//! Trace collection is a declared capability without a receiver yet. The
//! component participates in lifecycle and health so enabling it later is a
//! wiring change, not a supervisor change.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bounded_channel::BoundedSender;
use crate::collectors::{Collector, HealthHandle, TaskResult};
use crate::config::TracesCollectorConfig;
use crate::record::Record;

pub struct TracesCollector {
    #[allow(dead_code)]
    config: TracesCollectorConfig,
    health: HealthHandle,
}

impl TracesCollector {
    pub fn new(config: TracesCollectorConfig) -> Self {
        Self {
            config,
            health: HealthHandle::new(),
        }
    }
}

impl Collector for TracesCollector {
    fn name(&self) -> &'static str {
        "traces-collector"
    }

    fn health(&self) -> HealthHandle {
        self.health.clone()
    }

    fn start(
        self: Box<Self>,
        _bus: BoundedSender<Record>,
        tasks: &mut JoinSet<TaskResult>,
        cancel: &CancellationToken,
    ) -> TaskResult {
        info!("Starting traces collector (no receivers configured)");

        let cancel = cancel.clone();
        tasks.spawn(async move {
            cancel.cancelled().await;
            debug!("Traces collector stopped");
            Ok(())
        });

        Ok(())
    }
}
