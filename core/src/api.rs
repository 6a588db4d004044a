//! Stable re-exports for consumers (`cli` and external crates).
//!
//! Prefer importing from `outpost_core::api` instead of reaching into internal modules.

pub use crate::agent::{
    resolve, Agent, AgentOptions, AgentPhase, AgentSession, CliExecutor, Command,
    CommandExecutor, CommandOutcome, ControlPlane, Dispatch, HttpControlPlane, Invocation,
    ShutdownCause,
};
pub use crate::config::{
    apply_env_overrides, load, load_default, AppConfig, LoggingConfig, RetryConfig, RunnerConfig,
    ServerConfig, ShutdownConfig, StreamConfig,
};
pub use crate::error::{
    AgentError, CliError, ProcessError, RequestError, RequestErrorKind, StreamError,
};
pub use crate::http::{HttpResponse, RequestOptions, ResilientClient, RetryPolicy};
pub use crate::runner::{ManagedProcess, ProcessResult, ProcessRetry, RunOptions, Signal};
pub use crate::stream::{
    ConnectionState, EventSource, EventStreamClient, FailureKind, StreamEvent, StreamFailure,
    StreamNotification, StreamOptions,
};
