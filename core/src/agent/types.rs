use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::runner::ProcessResult;

pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// One unit of remote work. `id` is opaque and used to report the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub args: Map<String, Value>,
}

fn null_as_empty<'de, D>(de: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(de)?.unwrap_or_default())
}

impl Command {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub ok: bool,
    pub exit_code: i32,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body posted to `/command/{id}/done`.
#[derive(Debug, Serialize)]
struct ReportBody<'a> {
    ok: bool,
    output: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl CommandOutcome {
    pub fn from_process(result: &ProcessResult, cap_chars: usize) -> Self {
        let error = if result.succeeded {
            None
        } else if result.cancelled {
            let signal = result.signal.as_deref().unwrap_or("SIGTERM");
            Some(format!("command cancelled ({signal})"))
        } else if result.exit_code == -1 {
            match result.signal.as_deref() {
                Some(signal) => Some(format!("command terminated by {signal}")),
                None => Some("command exited with code -1".to_string()),
            }
        } else {
            Some(format!("command exited with code {}", result.exit_code))
        };
        Self {
            ok: result.succeeded,
            exit_code: result.exit_code,
            output: combine_output(&result.stdout, &result.stderr, cap_chars),
            error,
        }
    }

    pub fn from_timeout(timeout_ms: u64, partial: &ProcessResult, cap_chars: usize) -> Self {
        Self {
            ok: false,
            exit_code: partial.exit_code,
            output: combine_output(&partial.stdout, &partial.stderr, cap_chars),
            error: Some(format!("command timed out after {}", format_timeout(timeout_ms))),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            exit_code: -1,
            output: String::new(),
            error: Some(message.into()),
        }
    }

    pub fn report_body(&self) -> Value {
        serde_json::to_value(ReportBody {
            ok: self.ok,
            output: &self.output,
            error: self.error.as_deref(),
        })
        .unwrap_or(Value::Null)
    }
}

fn format_timeout(ms: u64) -> String {
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

/// stdout, then stderr on its own line, trimmed and capped at `cap_chars`.
pub fn combine_output(stdout: &str, stderr: &str, cap_chars: usize) -> String {
    let mut out = stdout.trim_end().to_string();
    if !stderr.trim().is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(stderr);
    }
    let out = out.trim_end();
    match out.char_indices().nth(cap_chars) {
        Some((cut, _)) => format!("{}{}", &out[..cut], TRUNCATION_MARKER),
        None => out.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Starting,
    DrainingBacklog,
    StreamConnecting,
    Listening,
    ShuttingDown,
    Draining,
    Terminated,
}

impl AgentPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::DrainingBacklog => "draining_backlog",
            Self::StreamConnecting => "stream_connecting",
            Self::Listening => "listening",
            Self::ShuttingDown => "shutting_down",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Operating-system signal, by name.
    Signal(String),
    AuthFailure(String),
    StreamFailed(String),
    /// One-shot backlog drain finished.
    Completed,
}

impl ShutdownCause {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AuthFailure(_) => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::AuthFailure(msg) => write!(f, "authentication failure: {msg}"),
            Self::StreamFailed(msg) => write!(f, "event stream failed: {msg}"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

/// Response of `GET /agent/connect`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub project: Value,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub endpoints: SessionEndpoints,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionEndpoints {
    #[serde(default)]
    pub dashboard: Option<String>,
}

impl AgentSession {
    /// Best-effort display name for logs.
    pub fn user_label(&self) -> String {
        match &self.user {
            Value::String(s) => s.clone(),
            Value::Object(map) => ["name", "email", "id"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .unwrap_or("unknown")
                .to_string(),
            _ => "unknown".to_string(),
        }
    }
}
