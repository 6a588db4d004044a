use std::fmt;

use thiserror::Error;

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    Auth,
    Network,
    Timeout,
    Http,
    Decode,
    InvalidUrl,
}

impl RequestErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Http => "http",
            Self::Decode => "decode",
            Self::InvalidUrl => "invalid_url",
        }
    }
}

impl fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single logical request (after any retries).
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("authentication failed status={status} url={url}")]
    Auth { status: u16, url: String },

    #[error("network error url={url}: {message}")]
    Network { url: String, message: String },

    #[error("request timed out url={url}: {message}")]
    Timeout { url: String, message: String },

    #[error("http error status={status} url={url}: {body}")]
    Http { status: u16, url: String, body: String },

    #[error("failed to decode response body url={url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl RequestError {
    pub fn kind(&self) -> RequestErrorKind {
        match self {
            Self::Auth { .. } => RequestErrorKind::Auth,
            Self::Network { .. } => RequestErrorKind::Network,
            Self::Timeout { .. } => RequestErrorKind::Timeout,
            Self::Http { .. } => RequestErrorKind::Http,
            Self::Decode { .. } => RequestErrorKind::Decode,
            Self::InvalidUrl { .. } => RequestErrorKind::InvalidUrl,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } | Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Network and timeout failures are transient; HTTP failures only for
    /// 5xx/408/429. Auth, decode and URL errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => is_retryable_status(*status),
            Self::Auth { .. } | Self::Decode { .. } | Self::InvalidUrl { .. } => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                message,
            }
        } else if err.is_decode() {
            Self::Decode {
                url: url.to_string(),
                message,
            }
        } else if err.is_builder() {
            Self::InvalidUrl {
                url: url.to_string(),
                message,
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message,
            }
        }
    }

    /// Classify a non-success status; 401/403 become `Auth`.
    pub(crate) fn from_status(status: u16, url: &str, body: &str) -> Self {
        if is_auth_status(status) {
            Self::Auth {
                status,
                url: url.to_string(),
            }
        } else {
            Self::Http {
                status,
                url: url.to_string(),
                body: preview_body(body),
            }
        }
    }
}

pub fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}

pub fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status) || status == 408 || status == 429
}

pub(crate) fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    let mut out = String::new();
    let mut truncated = false;
    for (idx, ch) in trimmed.chars().enumerate() {
        if idx >= BODY_PREVIEW_LIMIT {
            truncated = true;
            break;
        }
        out.push(ch);
    }

    if truncated {
        out.push_str("...");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        for status in [500, 502, 503, 599, 408, 429] {
            assert!(is_retryable_status(status), "{status} should retry");
        }
        for status in [400, 401, 403, 404, 409, 422, 200] {
            assert!(!is_retryable_status(status), "{status} should not retry");
        }
    }

    #[test]
    fn auth_statuses_map_to_auth_and_never_retry() {
        let err = RequestError::from_status(403, "http://cp/commands", "forbidden");
        assert_eq!(err.kind(), RequestErrorKind::Auth);
        assert!(err.is_auth());
        assert!(!err.is_retryable());
    }

    #[test]
    fn http_error_keeps_status_and_preview() {
        let err = RequestError::from_status(502, "http://cp/commands", "bad gateway");
        assert_eq!(err.kind(), RequestErrorKind::Http);
        assert_eq!(err.status(), Some(502));
        assert!(err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("status=502"));
        assert!(msg.contains("url=http://cp/commands"));
        assert!(msg.contains("bad gateway"));
    }

    #[test]
    fn preview_body_truncates() {
        assert_eq!(preview_body("   "), "<empty body>");
        let body = "a".repeat(BODY_PREVIEW_LIMIT + 10);
        let preview = preview_body(&body);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.len(), BODY_PREVIEW_LIMIT + 3);
    }
}
