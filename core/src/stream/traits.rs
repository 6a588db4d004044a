use tokio::sync::mpsc;

use crate::error::StreamError;

use super::types::{ConnectionState, StreamNotification};

/// Source of live control-plane notifications.
pub trait EventSource: Send + Sync {
    /// Start the background connection. May only be called once.
    fn connect(&self) -> Result<mpsc::Receiver<StreamNotification>, StreamError>;

    /// Stop reconnecting for good. Idempotent.
    fn disconnect(&self);

    fn state(&self) -> ConnectionState;
}
