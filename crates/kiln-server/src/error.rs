//! Error types for the Kiln server and client.

use std::path::PathBuf;
use std::time::Duration;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The endpoint could not be opened.
    #[error("Cannot open endpoint {address}: {message}")]
    Bind { address: String, message: String },

    /// Nothing is listening at the endpoint (yet).
    #[error("Endpoint not reachable: {0}")]
    Unreachable(String),

    /// Malformed or unexpected message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server processed the request and reported a failure.
    #[error("{0}")]
    Remote(String),

    /// The owning process could not be located.
    #[error("Owning process not found: {0}")]
    OwnerNotFound(String),

    /// The server could not be started, or exited before accepting requests.
    #[error("Server launch failed: {0}")]
    Launch(String),

    /// The client gave up waiting for a result.
    #[error("No build result after {0:?}")]
    Timeout(Duration),

    /// Kiln core error.
    #[error("Core error: {0}")]
    Core(#[from] kiln_core::Error),
}

impl ServerError {
    /// Whether the request can be retried once a server is listening.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ServerError::Unreachable(_))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: e.to_string(),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
