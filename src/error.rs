//! Error types for manifestdb.

use std::io;
use thiserror::Error;

/// Result type alias for manifestdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for database operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data corruption detected.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Lock error.
    #[error("Lock error: {0}")]
    LockError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An argument does not match the persisted state.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The database is closing or closed.
    #[error("Database is shutting down")]
    ShuttingDown,

    /// Background compaction failed.
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create a compaction error.
    pub fn compaction<S: Into<String>>(msg: S) -> Self {
        Error::Compaction(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Check if this error came from the filesystem.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
