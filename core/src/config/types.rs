use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Control-plane base URL, e.g. "https://cp.example.com/api".
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token. Required for the `/agent/connect` handshake.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:4400".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            project_id: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Token with surrounding whitespace removed; empty strings count as unset.
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries beyond the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter, as a fraction of the computed delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_retry_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_reconnect_interval_ms")]
    pub max_reconnect_interval_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_reconnect_interval_ms() -> u64 {
    3_000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_max_reconnect_interval_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_notification_capacity() -> usize {
    256
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_reconnect_interval_ms: default_max_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Executable of the local command-line collaborator.
    #[serde(default = "default_entry")]
    pub entry: String,

    /// Arguments placed before the command name on every invocation.
    #[serde(default)]
    pub entry_args: Vec<String>,

    #[serde(default)]
    pub cwd: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Timeout for audit-class commands, which walk the whole project.
    #[serde(default = "default_audit_timeout_ms")]
    pub audit_timeout_ms: u64,

    /// Per-stream capture limit; older bytes are dropped first.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Character cap applied to the reported output.
    #[serde(default = "default_output_cap_chars")]
    pub output_cap_chars: usize,

    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_runner_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_entry() -> String {
    "specaudit".to_string()
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_audit_timeout_ms() -> u64 {
    300_000
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_output_cap_chars() -> usize {
    20_000
}

fn default_runner_retry_delay_ms() -> u64 {
    1_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            entry: default_entry(),
            entry_args: Vec::new(),
            cwd: None,
            default_timeout_ms: default_timeout_ms(),
            audit_timeout_ms: default_audit_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            output_cap_chars: default_output_cap_chars(),
            retries: 0,
            retry_delay_ms: default_runner_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "outpost_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}
