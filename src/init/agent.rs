// SPDX-License-Identifier: Apache-2.0

//! The supervisor: owns every component, starts them bottom-up (sinks before
//! collectors) and stops them top-down (collectors first, then pipeline
//! drain, then sinks), with every wait bounded by the shutdown deadline.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::select;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::bounded;
use crate::collectors::events::EventsCollector;
use crate::collectors::logs::LogTailer;
use crate::collectors::metrics::MetricsSampler;
use crate::collectors::traces::TracesCollector;
use crate::collectors::{Collector, HealthHandle, TaskResult};
use crate::config::Config;
use crate::health::HealthServer;
use crate::listener::Listener;
use crate::platform::commands::{self, CommandContext};
use crate::platform::{AgentRegistration, ControlClient, Heartbeat};
use crate::record::Record;
use crate::sinks::Sink;
use crate::telemetry::Telemetry;
use crate::topology::fanout::FanOut;
use crate::topology::pipeline::{BatchConfig, Pipeline};

/// Capacity of the channel carrying batches from the pipeline to fan-out.
const BATCH_CHANNEL_SIZE: usize = 1_000;

/// How often the agent asks the platform for pending commands.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How often the agent checks for platform-pushed configuration.
const CONFIG_SYNC_INTERVAL: Duration = Duration::from_secs(300);

pub struct Agent {
    config: Config,
    config_path: PathBuf,
    shutdown_deadline: Duration,
}

impl Agent {
    pub fn new(config: Config, config_path: PathBuf, shutdown_deadline: Duration) -> Self {
        Self {
            config,
            config_path,
            shutdown_deadline,
        }
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> TaskResult {
        let config = self.config;

        info!(
            name = %config.agent.name,
            hostname = %config.agent.hostname,
            version = crate::VERSION,
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            "Starting Pulse Hive Agent"
        );

        let status = Arc::new(RwLock::new("starting".to_string()));
        let started_at = std::time::Instant::now();
        let telemetry = Telemetry::new();

        let mut collector_tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut pipeline_tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut sink_tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut platform_tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut aux_tasks: JoinSet<TaskResult> = JoinSet::new();

        let collectors_cancel = CancellationToken::new();
        let pipeline_cancel = CancellationToken::new();
        let sinks_cancel = CancellationToken::new();
        let platform_cancel = CancellationToken::new();
        let aux_cancel = CancellationToken::new();

        let (bus_tx, bus_rx) = bounded::<Record>(config.agent.buffer_size);
        let (batch_tx, batch_rx) = bounded::<Vec<Record>>(BATCH_CHANNEL_SIZE);

        //
        // Health endpoint first: observable before anything else moves.
        //
        if config.healthcheck.enabled {
            let endpoint: SocketAddr = ([0, 0, 0, 0], config.healthcheck.port).into();
            let listener = Listener::listen_async(endpoint).await?;
            let server = HealthServer::new(config.healthcheck.clone(), status.clone(), started_at);
            let cancel = aux_cancel.clone();
            aux_tasks.spawn(async move { server.serve(listener, cancel).await });
        }

        //
        // Self-metrics registry.
        //
        telemetry.set("agent.version", crate::VERSION);
        telemetry.set("agent.name", config.agent.name.clone());

        //
        // Pipeline.
        //
        let pipeline = Pipeline::new(
            bus_rx,
            batch_tx,
            BatchConfig {
                batch_size: config.agent.batch_size,
                flush_interval: config.agent.flush_interval,
                ..Default::default()
            },
            telemetry.clone(),
        );
        {
            let cancel = pipeline_cancel.clone();
            pipeline_tasks.spawn(pipeline.start(cancel));
        }

        //
        // Sinks and the distribution task.
        //
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
        let mut components: Vec<(String, HealthHandle)> = Vec::new();
        for spec in config.outputs.iter().filter(|o| o.enabled) {
            match crate::sinks::build(spec) {
                Ok(sink) => {
                    let sink: Arc<dyn Sink> = Arc::from(sink);
                    components.push((sink.name().to_string(), sink.health()));
                    sinks.push(sink);
                }
                Err(e) => {
                    error!(output = %spec.name, error = %e, "Failed to create output");
                }
            }
        }

        if sinks.is_empty() {
            warn!("No outputs are enabled, batches will be discarded by the distributor");
        }

        let fanout = FanOut::new(batch_rx, sinks.clone());
        {
            let cancel = sinks_cancel.clone();
            sink_tasks.spawn(fanout.start(cancel));
        }

        //
        // Platform registration. Failure is not fatal; the heartbeat loop
        // keeps the platform informed once it comes back.
        //
        let client = Arc::new(ControlClient::new(&config.server)?);
        let command_ctx = CommandContext {
            status: status.clone(),
            started_at,
            config_path: self.config_path.clone(),
        };

        let registration = AgentRegistration {
            name: config.agent.name.clone(),
            hostname: config.agent.hostname.clone(),
            ip_address: "127.0.0.1".to_string(),
            os_type: std::env::consts::OS.to_string(),
            os_version: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: crate::VERSION.to_string(),
            capabilities: config.capabilities().iter().map(|c| c.to_string()).collect(),
            system_info: command_ctx.system_info(),
            metadata: config.agent.tags.clone(),
        };
        if let Err(e) = client.register(&registration).await {
            warn!(error = %e, "Failed to register with platform");
        }

        for sink in &sinks {
            sink.start();
        }

        //
        // Collectors last: nothing produces until everything downstream is up.
        //
        let mut collectors: Vec<Box<dyn Collector>> = Vec::new();
        if config.collectors.logs.enabled {
            collectors.push(Box::new(LogTailer::new(
                config.collectors.logs.clone(),
                config.agent.data_dir.clone(),
            )));
        }
        if config.collectors.metrics.enabled {
            collectors.push(Box::new(MetricsSampler::new(config.collectors.metrics.clone())));
        }
        if config.collectors.traces.enabled {
            collectors.push(Box::new(TracesCollector::new(config.collectors.traces.clone())));
        }
        if config.collectors.events.enabled {
            collectors.push(Box::new(EventsCollector::new(config.collectors.events.clone())));
        }

        for collector in collectors {
            let name = collector.name();
            components.push((name.to_string(), collector.health()));
            if let Err(e) = collector.start(bus_tx.clone(), &mut collector_tasks, &collectors_cancel)
            {
                error!(collector = name, error = %e, "Failed to start collector");
                continue;
            }
            info!(collector = name, "Started collector");
        }
        // Collectors hold their own senders; the bus must close once they
        // stop, so the supervisor's copy goes now.
        drop(bus_tx);

        //
        // Platform services: heartbeat, config sync, command polling.
        //
        spawn_heartbeat(
            &mut platform_tasks,
            platform_cancel.clone(),
            client.clone(),
            command_ctx.clone(),
            telemetry.clone(),
            components,
            config.server.heartbeat_interval,
        );
        spawn_config_sync(&mut platform_tasks, platform_cancel.clone());
        spawn_command_poll(
            &mut platform_tasks,
            platform_cancel.clone(),
            client.clone(),
            command_ctx.clone(),
        );

        *status.write().unwrap() = "running".to_string();
        info!("Agent started successfully");

        //
        // Park until shutdown is requested or a component group dies early.
        //
        let have_collectors = !collector_tasks.is_empty();
        let mut result: TaskResult = Ok(());
        select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancellation signaled");
            },
            e = first_group_exit(&mut collector_tasks), if have_collectors => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of collector."),
                    Err(e) => result = Err(e),
                }
            },
            e = first_group_exit(&mut pipeline_tasks) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of pipeline."),
                    Err(e) => result = Err(e),
                }
            },
            e = first_group_exit(&mut sink_tasks) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of distribution."),
                    Err(e) => result = Err(e),
                }
            },
            e = first_group_exit(&mut platform_tasks) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of platform service."),
                    Err(e) => result = Err(e),
                }
            }
        }
        result?;

        //
        // Ordered shutdown under the drain deadline.
        //
        *status.write().unwrap() = "stopping".to_string();
        info!("Stopping agent...");

        let hard_stop = Instant::now() + self.shutdown_deadline;

        // Collectors first: no new input. Their exit drops the last bus
        // senders, which lets the pipeline drain and close the batch channel.
        collectors_cancel.cancel();
        if !drain_group(&mut collector_tasks, stage_deadline(hard_stop, Duration::from_secs(5)))
            .await
        {
            warn!("Collectors did not stop in time");
        }

        // Pipeline: exits on bus close after a final flush; cancel is the
        // backstop.
        if !drain_group(&mut pipeline_tasks, stage_deadline(hard_stop, Duration::from_secs(5)))
            .await
        {
            warn!("Pipeline did not exit on bus close, cancelling.");
            pipeline_cancel.cancel();
            if !drain_group(
                &mut pipeline_tasks,
                stage_deadline(hard_stop, Duration::from_millis(500)),
            )
            .await
            {
                return force_exit_error(&status, "pipeline did not stop before the drain deadline");
            }
        }

        // Distribution drains the batch channel, then sinks stop.
        if !drain_group(&mut sink_tasks, hard_stop).await {
            warn!("Distribution did not exit on channel close, cancelling.");
            sinks_cancel.cancel();
            if !drain_group(
                &mut sink_tasks,
                stage_deadline(hard_stop, Duration::from_millis(500)),
            )
            .await
            {
                return force_exit_error(
                    &status,
                    "distribution did not stop before the drain deadline",
                );
            }
        }
        for sink in &sinks {
            sink.stop();
        }

        // Auxiliary services go last so health stays observable during drain.
        platform_cancel.cancel();
        aux_cancel.cancel();
        if !drain_group(&mut platform_tasks, hard_stop).await {
            warn!("Platform services did not stop in time");
        }
        if !drain_group(&mut aux_tasks, hard_stop).await {
            warn!("Auxiliary services did not stop in time");
        }

        *status.write().unwrap() = "stopped".to_string();
        info!("Agent shutdown complete");

        Ok(())
    }
}

/// Resolves when any task in a component group finishes. While the agent is
/// parked, a group member exiting on its own is an anomaly worth reacting to.
async fn first_group_exit(group: &mut JoinSet<TaskResult>) -> TaskResult {
    match group.join_next().await {
        None => Ok(()),
        Some(Ok(res)) => res,
        Some(Err(e)) => Err(format!("component task panicked: {}", e).into()),
    }
}

/// Join every task in a component group, giving up at `stop_at`. Returns
/// false when the deadline passed with tasks still running. Task errors are
/// logged rather than propagated: the agent is already tearing down.
async fn drain_group(group: &mut JoinSet<TaskResult>, stop_at: Instant) -> bool {
    while let Ok(joined) = timeout_at(stop_at, group.join_next()).await {
        match joined {
            None => return true,
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => warn!(error = %e, "Task exited with error during shutdown"),
            Some(Err(e)) => warn!(error = %e, "Failed to join task during shutdown"),
        }
    }
    false
}

/// A stage may use up to `budget`, but never past the overall hard stop.
fn stage_deadline(hard_stop: Instant, budget: Duration) -> Instant {
    std::cmp::min(hard_stop, Instant::now() + budget)
}

fn force_exit_error(
    status: &Arc<RwLock<String>>,
    message: &str,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    *status.write().unwrap() = "stopped".to_string();
    warn!(message, "Shutdown deadline exceeded, forcing exit");
    Err(message.to_string().into())
}

/// Per-component health snapshots included in each heartbeat.
fn health_report(components: &[(String, HealthHandle)]) -> Map<String, Value> {
    let mut report = Map::new();
    for (name, handle) in components {
        report.insert(name.clone(), json!(handle.snapshot("operational")));
    }
    report
}

fn spawn_heartbeat(
    tasks: &mut JoinSet<TaskResult>,
    cancel: CancellationToken,
    client: Arc<ControlClient>,
    ctx: CommandContext,
    telemetry: Telemetry,
    components: Vec<(String, HealthHandle)>,
    interval: Duration,
) {
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate tick, registration just ran

        loop {
            select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let mut system_info = ctx.system_info();
                    system_info.insert(
                        "components".to_string(),
                        Value::Object(health_report(&components)),
                    );

                    let heartbeat = Heartbeat {
                        status: ctx.status_string(),
                        system_info,
                        metrics: telemetry.snapshot(),
                        timestamp: crate::record::now_rfc3339(),
                    };
                    if let Err(e) = client.heartbeat(&heartbeat).await {
                        error!(error = %e, "Failed to send heartbeat");
                    }
                }
            }
        }
    });
}

fn spawn_config_sync(tasks: &mut JoinSet<TaskResult>, cancel: CancellationToken) {
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(CONFIG_SYNC_INTERVAL);
        ticker.tick().await;

        loop {
            select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    // Platform-pushed configuration has no defined semantics
                    // yet; the tick exists so the cadence is already in place.
                    debug!("Configuration sync tick, nothing to apply");
                }
            }
        }
    });
}

fn spawn_command_poll(
    tasks: &mut JoinSet<TaskResult>,
    cancel: CancellationToken,
    client: Arc<ControlClient>,
    ctx: CommandContext,
) {
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(COMMAND_POLL_INTERVAL);
        ticker.tick().await;

        info!("Command service started, polling for commands");

        loop {
            select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let commands = match client.pending_commands().await {
                        Ok(commands) => commands,
                        Err(e) => {
                            error!(error = %e, "Failed to poll for commands");
                            continue;
                        }
                    };

                    for command in commands {
                        info!(id = %command.id, kind = %command.kind, "Received command");

                        let client = client.clone();
                        let ctx = ctx.clone();
                        // Commands run detached so a slow shell never blocks
                        // the poll cadence.
                        tokio::spawn(async move {
                            let response = commands::execute(command, &ctx).await;
                            if let Err(e) = client.send_command_response(&response).await {
                                error!(error = %e, "Failed to send command response");
                            }
                        });
                    }
                }
            }
        }
    });
}
