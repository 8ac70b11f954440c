// SPDX-License-Identifier: Apache-2.0

//! Data collectors. Each collector is a long-lived task that emits [`Record`]s
//! onto the shared bus and stops when the supervisor's cancellation token
//! fires. The set is closed: logs, metrics, traces, events.

pub mod events;
pub mod logs;
pub mod metrics;
pub mod traces;

use crate::bounded_channel::BoundedSender;
use crate::record::{now_rfc3339, Record};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub type TaskResult = Result<(), Box<dyn Error + Send + Sync>>;

/// A data-producing component. Starting moves the collector into one or more
/// tasks on the supervisor's JoinSet; stopping is signalled through the
/// cancellation token handed to `start`.
pub trait Collector: Send {
    fn name(&self) -> &'static str;

    /// Shared health state, readable after the collector has been started.
    fn health(&self) -> HealthHandle;

    fn start(
        self: Box<Self>,
        bus: BoundedSender<Record>,
        tasks: &mut JoinSet<TaskResult>,
        cancel: &CancellationToken,
    ) -> TaskResult;
}

/// Health snapshot surfaced through the health endpoint and heartbeats.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
    pub timestamp: String,
}

/// Shared mutable health state. Collectors update it from their tasks; the
/// supervisor snapshots it on demand.
#[derive(Clone, Default)]
pub struct HealthHandle {
    inner: Arc<Mutex<HealthInner>>,
}

#[derive(Default)]
struct HealthInner {
    last_error: Option<String>,
    details: BTreeMap<String, String>,
}

impl HealthHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.inner.lock().unwrap().last_error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.inner.lock().unwrap().last_error = None;
    }

    pub fn set_detail(&self, key: &str, value: impl ToString) {
        self.inner
            .lock()
            .unwrap()
            .details
            .insert(key.to_string(), value.to_string());
    }

    pub fn snapshot(&self, ok_message: &str) -> HealthStatus {
        let inner = self.inner.lock().unwrap();
        match &inner.last_error {
            Some(err) => HealthStatus {
                healthy: false,
                message: err.clone(),
                details: inner.details.clone(),
                timestamp: now_rfc3339(),
            },
            None => HealthStatus {
                healthy: true,
                message: ok_message.to_string(),
                details: inner.details.clone(),
                timestamp: now_rfc3339(),
            },
        }
    }
}
