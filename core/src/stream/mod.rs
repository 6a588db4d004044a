mod client;
mod parser;
pub mod traits;
pub mod types;

pub use client::EventStreamClient;
pub use traits::EventSource;
pub use types::{
    ConnectionState, FailureKind, StreamEvent, StreamFailure, StreamNotification, StreamOptions,
};
