// SPDX-License-Identifier: Apache-2.0

//! Agent configuration: a YAML file with environment-variable expansion,
//! defaults filled in after parse, and validation that is fatal at startup.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// Unknown keys are ignored rather than rejected: config files written for
// other agent builds (compression, multiline, custom metrics) must still
// load here.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub collectors: CollectorsConfig,
    #[serde(default)]
    pub outputs: Vec<SinkSpec>,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub healthcheck: HealthcheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub api_key: String,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,
    pub max_reconnects: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(10),
            max_reconnects: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub hostname: String,
    pub tags: HashMap<String, String>,
    pub data_dir: PathBuf,
    pub buffer_size: usize,
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    pub enable_profiling: bool,
    pub profiling_port: u16,
    pub metrics_port: u16,
    pub enable_self_monitoring: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            hostname: String::new(),
            tags: HashMap::new(),
            data_dir: PathBuf::from("/var/lib/pulse-hive"),
            buffer_size: 10_000,
            batch_size: 1_000,
            flush_interval: Duration::from_secs(10),
            enable_profiling: false,
            profiling_port: 6060,
            metrics_port: 8080,
            enable_self_monitoring: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// json or text
    pub format: String,
    /// stdout or file
    pub output: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output: "stdout".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CollectorsConfig {
    pub logs: LogCollectorConfig,
    pub metrics: MetricsCollectorConfig,
    pub traces: TracesCollectorConfig,
    pub events: EventsCollectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogCollectorConfig {
    pub enabled: bool,
    pub paths: Vec<LogPathConfig>,
    pub patterns: Vec<LogPatternConfig>,
    pub parsers: HashMap<String, ParserConfig>,
    pub excludes: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub rotate_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub scan_frequency: Duration,
    /// Declared for config compatibility; advisory only, never enforced.
    pub max_file_size: u64,
}

impl Default for LogCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paths: Vec::new(),
            patterns: Vec::new(),
            parsers: HashMap::new(),
            excludes: Vec::new(),
            rotate_wait: Duration::from_secs(5),
            scan_frequency: Duration::from_secs(10),
            max_file_size: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogPathConfig {
    pub path: String,
    pub parser: Option<String>,
    pub tags: HashMap<String, String>,
    pub fields: HashMap<String, String>,
    pub recursive: bool,
    pub max_depth: usize,
}

impl Default for LogPathConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            parser: None,
            tags: HashMap::new(),
            fields: HashMap::new(),
            recursive: false,
            max_depth: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LogPatternConfig {
    pub name: String,
    pub pattern: String,
    /// critical, error, warning, info
    pub severity: String,
    pub category: String,
    pub description: String,
    pub auto_fix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ParserConfig {
    /// regex, json, grok
    #[serde(rename = "type")]
    pub kind: String,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsCollectorConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub system: SystemMetricsConfig,
}

impl Default for MetricsCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(60),
            system: SystemMetricsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemMetricsConfig {
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
    pub network: bool,
    pub process: bool,
}

impl Default for SystemMetricsConfig {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            disk: true,
            network: true,
            process: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TracesCollectorConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EventsCollectorConfig {
    pub enabled: bool,
}

/// One downstream destination for batches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkSpec {
    pub name: String,
    /// http, elasticsearch, prometheus
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub url: String,
    pub auth: AuthConfig,
    pub headers: HashMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retry: RetrySpec,
    pub tls: TlsConfig,
    /// Record kinds this sink accepts; empty means all.
    pub data_types: Vec<String>,
}

impl Default for SinkSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "http".to_string(),
            enabled: false,
            url: String::new(),
            auth: AuthConfig::default(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            retry: RetrySpec::default(),
            tls: TlsConfig::default(),
            data_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// none, basic, bearer, api_key
    #[serde(rename = "type")]
    pub kind: String,
    pub username: String,
    pub password: String,
    pub token: String,
    pub api_key: String,
    /// Header name for api_key auth; defaults to X-API-Key.
    pub header: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySpec {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    pub backoff_multiple: f64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            backoff_multiple: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub ca_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthcheckConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8081,
            path: "/health".to_string(),
            interval: Duration::from_secs(30),
        }
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["debug", "info", "warn", "error", "fatal"];

impl Config {
    /// Load, expand environment variables, apply defaults, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;

        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(raw);
        let mut config: Config = serde_yaml::from_str(&expanded)?;
        config.set_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Zero values mean "use the default", the way the original deployments
    /// wrote their config files.
    fn set_defaults(&mut self) {
        if self.agent.name.is_empty() {
            self.agent.name = hostname();
        }
        if self.agent.hostname.is_empty() {
            self.agent.hostname = hostname();
        }

        zero_to(&mut self.server.heartbeat_interval, Duration::from_secs(30));
        zero_to(&mut self.server.reconnect_interval, Duration::from_secs(10));
        zero_to(&mut self.server.timeout, Duration::from_secs(30));
        zero_to(&mut self.agent.flush_interval, Duration::from_secs(10));
        zero_to(&mut self.collectors.logs.scan_frequency, Duration::from_secs(10));
        zero_to(&mut self.collectors.logs.rotate_wait, Duration::from_secs(5));
        zero_to(&mut self.collectors.metrics.interval, Duration::from_secs(60));
        zero_to(&mut self.healthcheck.interval, Duration::from_secs(30));

        if self.agent.buffer_size == 0 {
            self.agent.buffer_size = 10_000;
        }
        if self.agent.batch_size == 0 {
            self.agent.batch_size = 1_000;
        }
        if self.healthcheck.port == 0 {
            self.healthcheck.port = 8081;
        }

        for (i, out) in self.outputs.iter_mut().enumerate() {
            if out.name.is_empty() {
                out.name = format!("output-{}", i);
            }
            zero_to(&mut out.timeout, Duration::from_secs(30));
            if out.retry.max_retries == 0 {
                out.retry.max_retries = 3;
            }
            zero_to(&mut out.retry.initial_backoff, Duration::from_secs(5));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.url.is_empty() {
            return Err(ConfigError::Invalid("server.url is required".to_string()));
        }
        if self.server.api_key.is_empty() {
            return Err(ConfigError::Invalid(
                "server.api_key is required".to_string(),
            ));
        }
        if self.agent.name.is_empty() {
            return Err(ConfigError::Invalid("agent.name is required".to_string()));
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid logging level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Capability list reported at registration.
    pub fn capabilities(&self) -> Vec<&'static str> {
        let mut caps = Vec::new();
        if self.collectors.logs.enabled {
            caps.push("logs");
        }
        if self.collectors.metrics.enabled {
            caps.push("metrics");
        }
        if self.collectors.traces.enabled {
            caps.push("traces");
        }
        if self.collectors.events.enabled {
            caps.push("events");
        }
        caps
    }
}

fn zero_to(value: &mut Duration, default: Duration) {
    if value.is_zero() {
        *value = default;
    }
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Expand `$VAR` and `${VAR}` references against the process environment.
/// Unset variables expand to the empty string, matching os.ExpandEnv.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&std::env::var(&name).unwrap_or_default());
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some((_, c)) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }

    out
}

/// Default config file locations, checked in order.
pub fn default_config_paths() -> [&'static str; 3] {
    [
        "/etc/pulse-hive/config.yaml",
        "/usr/local/etc/pulse-hive/config.yaml",
        "./config.yaml",
    ]
}
