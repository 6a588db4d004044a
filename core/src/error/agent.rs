use thiserror::Error;

use super::{RequestError, StreamError};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("no api token configured (server.token or OUTPOST_TOKEN)")]
    MissingToken,

    #[error("handshake rejected by {url}")]
    HandshakeRejected { url: String },

    #[error("invalid control plane url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    Malformed { url: String, message: String },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl AgentError {
    /// The agent is not allowed to talk to the control plane.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::MissingToken | Self::HandshakeRejected { .. } => true,
            Self::Request(e) => e.is_auth(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_classification() {
        assert!(AgentError::MissingToken.is_auth());
        let forbidden = RequestError::Auth {
            status: 403,
            url: "http://x/commands".into(),
        };
        assert!(AgentError::from(forbidden).is_auth());
        let malformed = AgentError::Malformed {
            url: "http://x/commands".into(),
            message: "expected array".into(),
        };
        assert!(!malformed.is_auth());
    }
}
