// SPDX-License-Identifier: Apache-2.0

//! System metrics sampling.
//!
//! Samples the enabled categories on a fixed interval and emits one gauge or
//! counter record per measurement under the canonical `system.*` names. A
//! failing category is logged and skipped; the sampler itself never exits on
//! a read failure.

use std::collections::BTreeMap;

use sysinfo::{Disks, Networks, ProcessesToUpdate, System};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bounded_channel::BoundedSender;
use crate::collectors::{Collector, HealthHandle, TaskResult};
use crate::config::MetricsCollectorConfig;
use crate::record::{now_rfc3339, MetricKind, Record};

pub struct MetricsSampler {
    config: MetricsCollectorConfig,
    health: HealthHandle,
}

impl MetricsSampler {
    pub fn new(config: MetricsCollectorConfig) -> Self {
        let health = HealthHandle::new();
        health.set_detail("interval", humantime::format_duration(config.interval));
        Self { config, health }
    }
}

impl Collector for MetricsSampler {
    fn name(&self) -> &'static str {
        "system-metrics-collector"
    }

    fn health(&self) -> HealthHandle {
        self.health.clone()
    }

    fn start(
        self: Box<Self>,
        bus: BoundedSender<Record>,
        tasks: &mut JoinSet<TaskResult>,
        cancel: &CancellationToken,
    ) -> TaskResult {
        info!(interval = ?self.config.interval, "Starting system metrics collector");

        let mut sampler = Sampler::new(self.config.clone());
        let config = self.config;
        let health = self.health;
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Metrics collector received shutdown signal");
                        return Ok(());
                    }

                    // First tick fires immediately: one sample at startup.
                    _ = ticker.tick() => {
                        let (s, records) = tokio::task::spawn_blocking(move || {
                            let records = sampler.gather();
                            (sampler, records)
                        })
                        .await
                        .map_err(|e| format!("metrics gather task failed: {}", e))?;
                        sampler = s;

                        health.set_detail("last_sample_count", records.len());

                        for record in records {
                            tokio::select! {
                                _ = cancel.cancelled() => return Ok(()),
                                res = bus.send(record) => {
                                    if res.is_err() {
                                        // Bus closed, agent is shutting down.
                                        return Ok(());
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

/// Owns the sysinfo handles across samples so CPU usage deltas are meaningful.
struct Sampler {
    config: MetricsCollectorConfig,
    system: System,
    disks: Disks,
    networks: Networks,
}

impl Sampler {
    fn new(config: MetricsCollectorConfig) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self {
            config,
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    fn gather(&mut self) -> Vec<Record> {
        let timestamp = now_rfc3339();
        let mut records = Vec::new();

        if self.config.system.cpu {
            self.collect_cpu(&timestamp, &mut records);
        }
        if self.config.system.memory {
            self.collect_memory(&timestamp, &mut records);
        }
        if self.config.system.disk {
            self.collect_disk(&timestamp, &mut records);
        }
        if self.config.system.network {
            self.collect_network(&timestamp, &mut records);
        }
        if self.config.system.process {
            self.collect_processes(&timestamp, &mut records);
        }

        records
    }

    fn collect_cpu(&mut self, timestamp: &str, records: &mut Vec<Record>) {
        self.system.refresh_cpu_all();

        records.push(gauge(
            "system.cpu.usage_percent",
            self.system.global_cpu_usage() as f64,
            BTreeMap::new(),
            "percent",
            timestamp,
        ));

        for (i, cpu) in self.system.cpus().iter().enumerate() {
            let mut labels = BTreeMap::new();
            labels.insert("core".to_string(), i.to_string());
            records.push(gauge(
                "system.cpu.core.usage_percent",
                cpu.cpu_usage() as f64,
                labels,
                "percent",
                timestamp,
            ));
        }
    }

    fn collect_memory(&mut self, timestamp: &str, records: &mut Vec<Record>) {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let available = self.system.available_memory();
        let usage_percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let none = BTreeMap::new();
        records.push(gauge("system.memory.total", total as f64, none.clone(), "bytes", timestamp));
        records.push(gauge("system.memory.used", used as f64, none.clone(), "bytes", timestamp));
        records.push(gauge(
            "system.memory.available",
            available as f64,
            none.clone(),
            "bytes",
            timestamp,
        ));
        records.push(gauge(
            "system.memory.usage_percent",
            usage_percent,
            none.clone(),
            "percent",
            timestamp,
        ));
        records.push(gauge(
            "system.swap.total",
            self.system.total_swap() as f64,
            none.clone(),
            "bytes",
            timestamp,
        ));
        records.push(gauge(
            "system.swap.used",
            self.system.used_swap() as f64,
            none,
            "bytes",
            timestamp,
        ));
    }

    fn collect_disk(&mut self, timestamp: &str, records: &mut Vec<Record>) {
        self.disks.refresh();

        for disk in self.disks.iter() {
            let total = disk.total_space();
            let free = disk.available_space();
            let used = total.saturating_sub(free);
            let usage_percent = if total > 0 {
                used as f64 / total as f64 * 100.0
            } else {
                0.0
            };

            let mut labels = BTreeMap::new();
            labels.insert("device".to_string(), disk.name().to_string_lossy().into_owned());
            labels.insert(
                "mountpoint".to_string(),
                disk.mount_point().display().to_string(),
            );
            labels.insert(
                "fstype".to_string(),
                disk.file_system().to_string_lossy().into_owned(),
            );

            records.push(gauge("system.disk.total", total as f64, labels.clone(), "bytes", timestamp));
            records.push(gauge("system.disk.used", used as f64, labels.clone(), "bytes", timestamp));
            records.push(gauge("system.disk.free", free as f64, labels.clone(), "bytes", timestamp));
            records.push(gauge(
                "system.disk.usage_percent",
                usage_percent,
                labels,
                "percent",
                timestamp,
            ));
        }
    }

    fn collect_network(&mut self, timestamp: &str, records: &mut Vec<Record>) {
        self.networks.refresh();

        for (name, data) in self.networks.iter() {
            let mut labels = BTreeMap::new();
            labels.insert("interface".to_string(), name.clone());

            records.push(counter(
                "system.network.bytes_sent",
                data.total_transmitted() as f64,
                labels.clone(),
                "bytes",
                timestamp,
            ));
            records.push(counter(
                "system.network.bytes_recv",
                data.total_received() as f64,
                labels.clone(),
                "bytes",
                timestamp,
            ));
            records.push(counter(
                "system.network.packets_sent",
                data.total_packets_transmitted() as f64,
                labels.clone(),
                "count",
                timestamp,
            ));
            records.push(counter(
                "system.network.packets_recv",
                data.total_packets_received() as f64,
                labels,
                "count",
                timestamp,
            ));
        }
    }

    fn collect_processes(&mut self, timestamp: &str, records: &mut Vec<Record>) {
        self.system
            .refresh_processes(ProcessesToUpdate::All, true);

        let processes = self.system.processes();
        records.push(gauge(
            "system.processes.count",
            processes.len() as f64,
            BTreeMap::new(),
            "count",
            timestamp,
        ));

        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        for process in processes.values() {
            *by_status.entry(process.status().to_string()).or_default() += 1;
        }

        for (status, count) in by_status {
            let mut labels = BTreeMap::new();
            labels.insert("status".to_string(), status);
            records.push(gauge(
                "system.processes.by_status",
                count as f64,
                labels,
                "count",
                timestamp,
            ));
        }
    }
}

fn gauge(
    name: &str,
    value: f64,
    labels: BTreeMap<String, String>,
    unit: &str,
    timestamp: &str,
) -> Record {
    Record::Metric {
        name: name.to_string(),
        kind: MetricKind::Gauge,
        value,
        labels,
        unit: unit.to_string(),
        timestamp: timestamp.to_string(),
    }
}

fn counter(
    name: &str,
    value: f64,
    labels: BTreeMap<String, String>,
    unit: &str,
    timestamp: &str,
) -> Record {
    Record::Metric {
        name: name.to_string(),
        kind: MetricKind::Counter,
        value,
        labels,
        unit: unit.to_string(),
        timestamp: timestamp.to_string(),
    }
}
