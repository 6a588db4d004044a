use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("event stream already started")]
    AlreadyStarted,

    #[error("invalid stream url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("failed to build stream client: {0}")]
    Client(#[from] reqwest::Error),
}
