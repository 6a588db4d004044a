use std::time::Duration;

use serde_json::Value;

use crate::config::StreamConfig;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// `"message"` unless the block named another type.
    pub event_type: String,
    /// Data lines joined by `\n`, decoded as JSON when possible, else a string.
    pub data: Value,
    pub id: Option<String>,
    pub retry_hint_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Stopped by `disconnect()`. Terminal.
    Disconnected,
    /// Gave up (auth rejected or reconnects exhausted). Terminal.
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Http(u16),
    Network,
    Timeout,
    /// `max_reconnect_attempts` reached.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    pub kind: FailureKind,
    pub message: String,
    /// The client has stopped and will not reconnect.
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotification {
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected,
    Error(StreamFailure),
    Event(StreamEvent),
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub reconnect_interval: Duration,
    pub backoff_multiplier: f64,
    pub max_reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    pub notification_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for StreamOptions {
    fn from(cfg: &StreamConfig) -> Self {
        Self {
            reconnect_interval: Duration::from_millis(cfg.reconnect_interval_ms),
            backoff_multiplier: cfg.backoff_multiplier,
            max_reconnect_interval: Duration::from_millis(cfg.max_reconnect_interval_ms),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            notification_capacity: cfg.notification_capacity.max(1),
        }
    }
}

impl StreamOptions {
    /// `min(base * multiplier^attempts, max)`, where `attempts` counts failures so far.
    pub fn reconnect_delay(&self, base: Duration, attempts: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempts.min(i32::MAX as u32) as i32);
        let ms = (base.as_millis() as f64 * factor).min(self.max_reconnect_interval.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }
}
