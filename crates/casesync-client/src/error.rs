//! Error types for the REST client.

use casesync_engine::BackendError;
use thiserror::Error;

/// Errors that can occur when talking to the workflow engine over HTTP.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the connection dropped.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured base URL cannot address REST resources.
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<ClientError> for BackendError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(e) if e.is_decode() => BackendError::Decode(e.to_string()),
            ClientError::Http(e) => BackendError::Transport(e.to_string()),
            ClientError::InvalidUrl(url) => BackendError::Transport(format!("invalid base URL: {url}")),
            ClientError::NotFound(what) => BackendError::NotFound(what),
            ClientError::Status { status, message } => BackendError::Status { status, message },
            ClientError::Serialization(e) => BackendError::Decode(e),
        }
    }
}
