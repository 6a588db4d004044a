use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RunnerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Term,
    Kill,
    Interrupt,
    Hangup,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
            Self::Interrupt => "SIGINT",
            Self::Hangup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    pub(crate) fn as_raw(self) -> i32 {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Interrupt => libc::SIGINT,
            Self::Hangup => libc::SIGHUP,
        }
    }

    /// Name for a raw signal number, e.g. `15` -> `SIGTERM`.
    pub fn name_of(raw: i32) -> String {
        match raw {
            1 => "SIGHUP".to_string(),
            2 => "SIGINT".to_string(),
            9 => "SIGKILL".to_string(),
            15 => "SIGTERM".to_string(),
            other => format!("SIG{other}"),
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one subprocess life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// `-1` when the process ended by signal or never started.
    pub exit_code: i32,
    pub signal: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ProcessResult {
    pub(crate) fn cancelled_before_start(signal: Signal) -> Self {
        Self {
            exit_code: -1,
            signal: Some(signal.as_str().to_string()),
            stdout: String::new(),
            stderr: String::new(),
            succeeded: false,
            timed_out: false,
            cancelled: true,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    /// Per-stream capture cap; the oldest bytes are dropped first.
    pub max_output_bytes: usize,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl RunOptions {
    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.default_timeout_ms),
            max_output_bytes: cfg.max_output_bytes,
            cwd: cfg
                .cwd
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            env: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRetry {
    /// Re-runs after the first attempt.
    pub retries: u32,
    pub delay: Duration,
}

impl ProcessRetry {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            retries: cfg.retries,
            delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}
