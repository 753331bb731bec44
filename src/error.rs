//! Error types for Trueno-LabDB
//!
//! Every structural failure names the offending path and the violated
//! constraint. Only backend cleanup during `rm` is recovered locally.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-LabDB error types
#[derive(Error, Debug)]
pub enum Error {
    /// Path or experiment does not exist
    #[error("Path {path} does not exist")]
    NotFound {
        /// Offending path
        path: String,
    },

    /// A node already occupies the path
    #[error("Path {path} already exists")]
    AlreadyExists {
        /// Offending path
        path: String,
    },

    /// Structural violation (cycle, path collision)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Disallowed operation (e.g. deleting root)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Session state does not allow the call
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Malformed or root-escaping path
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath {
        /// Raw path as given by the caller
        path: String,
        /// Which rule was broken
        reason: String,
    },

    /// Storage backend I/O failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Large-object operation against a backend that cannot serve it
    #[error("Unsupported operation: {0}\nConfigure a large_file_storage backend (content or local) to store large values")]
    UnsupportedOperation(String),

    /// Backend call exceeded its deadline. Raised by [`NodeStore`] and
    /// [`LargeObjectBucket`] implementations and passed through unchanged.
    ///
    /// [`NodeStore`]: crate::store::NodeStore
    /// [`LargeObjectBucket`]: crate::store::LargeObjectBucket
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller-supplied value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub(crate) fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
