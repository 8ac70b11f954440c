// SPDX-License-Identifier: Apache-2.0

//! Execution of platform-delivered commands.

use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

use super::client::{Command, CommandResponse};
use crate::config::Config;
use crate::record::now_rfc3339;

/// Shell commands are bounded by this deadline.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const RESTART_COMMAND: &str = "sudo systemctl restart hive-agent || sudo launchctl restart com.pulse.hive-agent || sudo service hive-agent restart";
const RESTART_FALLBACK: &str = "sudo pkill -f hive-agent && sleep 2 && sudo systemctl start hive-agent || sudo launchctl start com.pulse.hive-agent || sudo service hive-agent start";

/// Everything a command needs to observe the running agent.
#[derive(Clone)]
pub struct CommandContext {
    pub status: Arc<RwLock<String>>,
    pub started_at: Instant,
    pub config_path: PathBuf,
}

impl CommandContext {
    pub fn status_string(&self) -> String {
        self.status.read().unwrap().clone()
    }

    pub fn system_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert(
            "uptime".to_string(),
            json!(self.started_at.elapsed().as_secs_f64()),
        );
        info.insert(
            "cpu_cores".to_string(),
            json!(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)),
        );
        info.insert("os".to_string(), json!(std::env::consts::OS));
        info.insert("arch".to_string(), json!(std::env::consts::ARCH));
        info.insert("version".to_string(), json!(crate::VERSION));
        info
    }
}

/// Dispatch a command by type and build its response.
pub async fn execute(command: Command, ctx: &CommandContext) -> CommandResponse {
    let started = Instant::now();

    let mut response = CommandResponse {
        id: command.id.clone(),
        success: false,
        response: None,
        error: None,
        exit_code: 0,
        execution_time_ms: 0,
        timestamp: now_rfc3339(),
    };

    match command.kind.as_str() {
        "system" | "execute" => {
            let (output, exit_code, failed) = run_shell(&command.command).await;
            response.exit_code = exit_code;
            if failed {
                response.error = Some(output);
            } else {
                response.success = true;
                response.response = Some(output);
            }
        }

        "config_reload" => match reload_check(&ctx.config_path) {
            Ok(summary) => {
                response.success = true;
                response.response = Some(summary);
            }
            Err(e) => {
                response.error = Some(e);
            }
        },

        "restart" => {
            let (output, exit_code, failed) = run_shell(RESTART_COMMAND).await;
            if failed {
                let (alt_output, alt_code, alt_failed) = run_shell(RESTART_FALLBACK).await;
                if alt_failed {
                    response.error = Some(format!(
                        "Restart failed: {}; Alternative failed: {}",
                        output, alt_output
                    ));
                    response.exit_code = exit_code;
                } else {
                    response.success = true;
                    response.response =
                        Some(format!("Agent restarted via alternative method: {}", alt_output));
                    response.exit_code = alt_code;
                }
            } else {
                response.success = true;
                response.response = Some(format!("Agent restart command executed: {}", output));
                response.exit_code = exit_code;
            }
        }

        "status" => {
            let status = json!({
                "status": ctx.status_string(),
                "uptime_seconds": ctx.started_at.elapsed().as_secs_f64(),
                "system_info": ctx.system_info(),
            });
            response.success = true;
            response.response = Some(status.to_string());
        }

        other => {
            response.error = Some(format!("Unknown command type: {}", other));
        }
    }

    response.execution_time_ms = started.elapsed().as_millis() as i64;
    response.timestamp = now_rfc3339();

    info!(
        id = %command.id,
        kind = %command.kind,
        success = response.success,
        execution_time_ms = response.execution_time_ms,
        "Command executed"
    );

    response
}

/// Run a command line in a POSIX shell with combined output and a deadline.
/// Returns (output, exit code, failed).
async fn run_shell(command: &str) -> (String, i32, bool) {
    let result = tokio::time::timeout(
        COMMAND_TIMEOUT,
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output(),
    )
    .await;

    match result {
        Err(_) => (
            format!("command timed out after {:?}", COMMAND_TIMEOUT),
            -1,
            true,
        ),
        Ok(Err(e)) => (format!("failed to run command: {}", e), 1, true),
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            let exit_code = output.status.code().unwrap_or(1);
            (combined, exit_code, !output.status.success())
        }
    }
}

/// Re-read and validate the configuration file. This does not hot-swap any
/// running component; the response says exactly what happened so the
/// platform is never told a reload occurred when it did not.
fn reload_check(config_path: &PathBuf) -> Result<String, String> {
    match Config::load(config_path) {
        Ok(config) => Ok(format!(
            "Configuration re-read and validated ({} outputs, collectors: {}). Running components are unchanged; restart the agent to apply.",
            config.outputs.len(),
            config.capabilities().join(",")
        )),
        Err(e) => Err(format!("Configuration reload check failed: {}", e)),
    }
}
