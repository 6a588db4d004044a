mod active;
mod control;
pub mod dispatch;
mod executor;
mod orchestrator;
pub mod types;

pub use active::{ActiveCommands, ActiveGuard};
pub use control::{ControlPlane, HttpControlPlane};
pub use dispatch::{resolve, Dispatch, Invocation};
pub use executor::{CliExecutor, CommandExecutor};
pub use orchestrator::{Agent, AgentOptions, REPORT_WAIT};
pub use types::{
    combine_output, AgentPhase, AgentSession, Command, CommandOutcome, SessionEndpoints,
    ShutdownCause, TRUNCATION_MARKER,
};
