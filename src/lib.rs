// SPDX-License-Identifier: Apache-2.0

pub mod bounded_channel;
pub mod collectors;
pub mod config;
pub mod health;
pub mod init;
pub mod listener;
pub mod platform;
pub mod record;
pub mod sinks;
pub mod telemetry;
pub mod topology;

/// Agent version reported to the platform and in the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent sent on every outbound HTTP request.
pub const USER_AGENT: &str = "Pulse-Hive-Agent/1.0.0";
