mod io_pump;
mod kill;
mod retry;
mod supervisor;
pub mod types;

pub use supervisor::ManagedProcess;
pub use types::{ProcessResult, ProcessRetry, RunOptions, Signal};
