// SPDX-License-Identifier: Apache-2.0

//! System event collection is a declared capability without sources yet; the
//! component exists for lifecycle and health parity.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bounded_channel::BoundedSender;
use crate::collectors::{Collector, HealthHandle, TaskResult};
use crate::config::EventsCollectorConfig;
use crate::record::Record;

pub struct EventsCollector {
    #[allow(dead_code)]
    config: EventsCollectorConfig,
    health: HealthHandle,
}

impl EventsCollector {
    pub fn new(config: EventsCollectorConfig) -> Self {
        Self {
            config,
            health: HealthHandle::new(),
        }
    }
}

impl Collector for EventsCollector {
    fn name(&self) -> &'static str {
        "events-collector"
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
        info!("Starting events collector (no sources configured)");

        let cancel = cancel.clone();
        tasks.spawn(async move {
            cancel.cancelled().await;
            debug!("Events collector stopped");
            Ok(())
        });

        Ok(())
    }
}
