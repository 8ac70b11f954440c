// SPDX-License-Identifier: Apache-2.0

//! Agent self-metrics: a small shared registry components update and the
//! heartbeat snapshots.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct Telemetry {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.inner
            .write()
            .unwrap()
            .insert(name.to_string(), value.into());
    }

    pub fn incr(&self, name: &str, by: u64) {
        let mut metrics = self.inner.write().unwrap();
        let counter = metrics.entry(name.to_string()).or_insert(Value::from(0u64));
        let current = counter.as_u64().unwrap_or(0);
        *counter = Value::from(current + by);
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
