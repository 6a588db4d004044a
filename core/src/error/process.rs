use thiserror::Error;

use crate::runner::ProcessResult;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("spawn failed: {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wait on child failed: {0}")]
    Wait(#[source] std::io::Error),

    /// Deadline exceeded. Carries whatever output was captured before the kill.
    #[error("process timed out after {timeout_ms}ms")]
    Timeout {
        timeout_ms: u64,
        result: Box<ProcessResult>,
    },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
