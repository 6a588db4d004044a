use thiserror::Error;

use super::{AgentError, ProcessError, RequestError, StreamError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("agent failed: {0}")]
    Agent(#[from] AgentError),
    #[error("request failed: {0}")]
    Request(#[from] RequestError),
    #[error("process failed: {0}")]
    Process(#[from] ProcessError),
    #[error("stream failed: {0}")]
    Stream(#[from] StreamError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit code for an error that escaped the agent loop.
    ///
    /// 1: authentication / refused start, 11: config, 20: io or spawn, 50: other.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 11,
            Self::Agent(e) if e.is_auth() => 1,
            Self::Agent(_) => 50,
            Self::Request(e) if e.is_auth() => 1,
            Self::Request(_) => 50,
            Self::Process(_) => 20,
            Self::Stream(_) => 50,
            Self::Io(_) => 20,
            Self::Anyhow(_) => 50,
        }
    }
}
