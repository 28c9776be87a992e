//! Response container shared by the facade operations
//!
//! Facade calls never return `Err`: a remote or local failure is carried as
//! text next to a default body, so one failed key cannot unwind a batch.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A body plus an error message; an empty message means success
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3UtilResponse<T> {
    body: T,
    error: String,
}

impl<T> S3UtilResponse<T> {
    pub fn new(body: T, error: impl Into<String>) -> Self {
        Self {
            body,
            error: error.into(),
        }
    }

    /// Successful response
    pub fn ok(body: T) -> Self {
        Self::new(body, String::new())
    }

    /// Body; only meaningful when [`is_ok`](Self::is_ok)
    pub const fn body(&self) -> &T {
        &self.body
    }

    /// Error message, empty on success
    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub fn into_body(self) -> T {
        self.body
    }

    /// Convert to a `Result`, dropping the placeholder body on failure
    pub fn into_result(self) -> Result<T, String> {
        if self.error.is_empty() {
            Ok(self.body)
        } else {
            Err(self.error)
        }
    }
}

impl<T: Default> S3UtilResponse<T> {
    /// Failed response with a default body
    pub fn err(error: impl fmt::Display) -> Self {
        let mut error = error.to_string();
        if error.is_empty() {
            // an empty message would read as success
            error.push_str("unknown error");
        }
        Self::new(T::default(), error)
    }
}

/// Outcome of downloading one key of a batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectDownload {
    /// Object key as listed
    pub key: String,
    /// Local file the key was written to
    pub local_path: PathBuf,
    pub response: GetObjectResponse,
}

impl ObjectDownload {
    pub fn is_ok(&self) -> bool {
        self.response.is_ok()
    }
}

pub type GetObjectResponse = S3UtilResponse<bool>;
pub type ListObjectsResponse = S3UtilResponse<Vec<String>>;
pub type GetObjectsResponse = S3UtilResponse<Vec<ObjectDownload>>;
pub type GetObjectMetadataResponse = S3UtilResponse<HashMap<String, String>>;
