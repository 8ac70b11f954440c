// SPDX-License-Identifier: Apache-2.0

//! Communication with the Pulse platform: registration, heartbeats, command
//! polling and responses, and the execution of delivered commands.

pub mod client;
pub mod commands;

pub use client::{AgentRegistration, Command, CommandResponse, ControlClient, Heartbeat, PlatformError};
