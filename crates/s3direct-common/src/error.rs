//! Error types for s3direct
//!
//! This module defines the common error types used throughout the system.

use thiserror::Error;

/// Common result type for s3direct operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for s3direct
#[derive(Debug, Error)]
pub enum Error {
    // Local I/O errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("I/O error on {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error: {0}")]
    Storage(String),

    // Remote store errors
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("access denied")]
    AccessDenied,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    #[error("remote store error: {0}")]
    Remote(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid s3 path: {0}")]
    InvalidS3Path(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an I/O error bound to a local path
    pub fn file_io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a remote store error
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// OS error code of the underlying local I/O failure, if any
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::DiskIo(e) | Self::FileIo { source: e, .. } => e.raw_os_error(),
            _ => None,
        }
    }

    /// Check if this is a retryable error
    ///
    /// Nothing in this workspace retries; the classification is for callers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailed(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BucketNotFound(_) | Self::ObjectNotFound { .. }
        )
    }
}

impl From<Error> for std::io::Error {
    /// Local I/O failures give back their OS error; everything else is wrapped
    fn from(err: Error) -> Self {
        match err {
            Error::FileIo { source, .. } | Error::DiskIo(source) => source,
            other => Self::other(other),
        }
    }
}
