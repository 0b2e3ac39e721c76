//! Error types for the Galaxy store and its backends.

use galaxy_core::NameError;
use thiserror::Error;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures talking to the shared key-value store.
///
/// Every variant is transient from the caller's point of view: none of them
/// means "the key does not exist".
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("connection closed")]
    Closed,
}

/// Errors returned by [`crate::Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error(transparent)]
    InvalidName(#[from] NameError),
}
