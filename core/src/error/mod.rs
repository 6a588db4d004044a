pub mod agent;
#[allow(clippy::module_inception)]
pub mod error;
pub mod http;
pub mod process;
pub mod stream;

pub use agent::AgentError;
pub use error::CliError;
pub use http::{is_retryable_status, RequestError, RequestErrorKind};
pub use process::ProcessError;
pub use stream::StreamError;
