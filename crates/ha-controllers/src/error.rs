//! Error types for entity controllers

use ha_remote::RemoteError;
use thiserror::Error;

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that can occur when commanding an entity
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Unknown color: {0}")]
    UnknownColor(String),

    #[error("Invalid brightness {0}: must be between 0 and 255")]
    InvalidBrightness(i64),

    /// The server answered the service call with a non-success status
    #[error("command rejected with status {status}: {body}")]
    CommandRejected { status: u16, body: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
