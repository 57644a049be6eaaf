//! Error types for remote state access

use thiserror::Error;

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur when talking to the remote state API
///
/// Cloneable so a single failed fetch can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The server answered with a non-success status
    #[error("request to {path} failed with status {status}: {body}")]
    Fetch {
        path: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response
    #[error("network error while requesting {path}: {message}")]
    Network { path: String, message: String },

    /// The request or the caller's deadline expired
    #[error("request timed out")]
    Timeout,

    /// The response body could not be decoded
    #[error("failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    /// The base URL is unusable
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The token was rejected when probing the API
    #[error("token rejected by {url}")]
    InvalidToken { url: String },
}

impl RemoteError {
    /// HTTP status for errors that carry one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fetch { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error is transient and the caller may try again later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout | Self::Fetch { status: 500.., .. }
        )
    }
}
