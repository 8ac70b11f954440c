// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use pulse_hive_agent::config::{default_config_paths, Config};
use pulse_hive_agent::init::agent::Agent;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

/// SIGINT/SIGTERM start a graceful drain bounded by this deadline.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "pulse-hive-agent")]
#[command(version, about = "Pulse Hive Agent - distributed observability agent", long_about = None)]
struct Arguments {
    /// Path to configuration file (default: auto-detect)
    #[arg(short, long, env = "PULSE_HIVE_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let config_path = match opt.config.or_else(discover_config) {
        Some(path) => path,
        None => {
            eprintln!("ERROR: no configuration file found. Use --config to specify a location.");
            return ExitCode::from(1);
        }
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: failed to load configuration: {}", e);
            return ExitCode::from(1);
        }
    };

    let _logger = match setup_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    info!(config = %config_path.display(), version = pulse_hive_agent::VERSION, "Loaded configuration");

    match run_agent(config, config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Agent exited with error");
            ExitCode::from(1)
        }
    }
}

fn discover_config() -> Option<PathBuf> {
    default_config_paths()
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

#[tokio::main]
async fn run_agent(config: Config, config_path: PathBuf) -> Result<(), Box<dyn Error + Send + Sync>> {
    let agent = Agent::new(config, config_path, SHUTDOWN_DEADLINE);

    let agent_cancel = CancellationToken::new();

    {
        let agent_cancel = agent_cancel.clone();
        tokio::spawn(async move {
            signal_wait().await;
            info!("Received shutdown signal");
            agent_cancel.cancel();
        });
    }

    agent.run(agent_cancel).await
}

async fn signal_wait() {
    let mut sig_term = sig(SignalKind::terminate());
    let mut sig_int = sig(SignalKind::interrupt());

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

fn sig(kind: SignalKind) -> Signal {
    signal(kind).expect("failed to install signal handler")
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(config: &Config) -> Result<LoggerGuard, Box<dyn Error + Send + Sync>> {
    LogTracer::init()?;

    // The config validates `fatal` for compatibility; tracing tops out at error.
    let level = match config.logging.level.as_str() {
        "fatal" => "error",
        other => other,
    };

    let (non_blocking_writer, guard) = match config.logging.output.as_str() {
        "file" => {
            let path = config
                .logging
                .file
                .clone()
                .ok_or("logging.output is 'file' but logging.file is not set")?;
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().ok_or("logging.file has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            tracing_appender::non_blocking(appender)
        }
        _ => tracing_appender::non_blocking(std::io::stdout()),
    };

    if config.logging.format == "json" {
        let app_name = format!("pulse-hive-agent-{}", pulse_hive_agent::VERSION);
        let bunyan_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(EnvFilter::new(level))
            .with(JsonStorageLayer)
            .with(bunyan_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .compact();

        let subscriber = Registry::default()
            .with(EnvFilter::new(level))
            .with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}
