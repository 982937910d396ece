//! Error types for the proxy.

use thiserror::Error;

/// Bytes of a failing provider body kept in an `Upstream` error.
pub const UPSTREAM_BODY_LIMIT: usize = 1024;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Provider request failed: {message}")]
    Transport { message: String },

    #[error("Provider returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Unexpected provider response: {message}")]
    Protocol { message: String },

    #[error("Failed to decode provider event: {message}")]
    Decode { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication {
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    /// Build an upstream error, keeping at most [`UPSTREAM_BODY_LIMIT`] bytes of `body`.
    pub fn upstream(status: u16, body: &str) -> Self {
        Self::Upstream {
            status,
            body: truncate(body, UPSTREAM_BODY_LIMIT).to_string(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// HTTP status the caller-facing layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Authentication { .. } => 401,
            Self::Upstream { status, .. } if (400..500).contains(status) => *status,
            Self::Upstream { .. }
            | Self::Transport { .. }
            | Self::Protocol { .. }
            | Self::Decode { .. } => 502,
            Self::Config { .. } | Self::Io(_) | Self::Json(_) | Self::Toml(_) => 500,
        }
    }

    /// Error `type` string shared by both client dialects.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid_request_error",
            Self::Authentication { .. } => "authentication_error",
            _ => "api_error",
        }
    }
}

/// Cut `s` to at most `max` bytes without splitting a UTF-8 sequence.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub type Result<T> = std::result::Result<T, ProxyError>;
