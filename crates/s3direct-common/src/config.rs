//! Configuration types for s3direct
//!
//! Configuration is read from a TOML file. Every section and field has a
//! default, so an empty file (or no file at all) is a valid configuration
//! apart from the bucket name, which has to come from somewhere.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Root configuration for s3direct
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Object store configuration
    pub s3: S3Config,
    /// Local direct I/O configuration
    pub direct_io: DirectIoConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::file_io(path, e))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::configuration(format!("failed to parse config: {e}")))
    }

    /// Check the settings a facade cannot be built without
    pub fn validate(&self) -> Result<()> {
        if self.s3.bucket.is_empty() {
            return Err(Error::configuration("s3.bucket must not be empty"));
        }
        if self.direct_io.buffer_pages == 0 {
            return Err(Error::configuration(
                "direct_io.buffer_pages must be at least 1",
            ));
        }
        Ok(())
    }
}

/// URI scheme used to reach the object store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Https => f.write_str("https"),
        }
    }
}

/// Object store client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Bucket every facade operation runs against
    pub bucket: String,
    /// Region name (e.g., "us-east-1"); ignored for the URI when
    /// `endpoint_override` is set
    pub region: String,
    /// Explicit endpoint (host[:port]) for S3-compatible stores
    pub endpoint_override: Option<String>,
    /// Request scheme
    pub scheme: Scheme,
    /// Connection timeout (milliseconds)
    pub connect_timeout_ms: u64,
    /// Per-request read timeout (milliseconds)
    pub request_timeout_ms: u64,
    /// Download bandwidth cap in MB/s (0 = unlimited)
    pub read_ratelimit_mb: u32,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint_override: None,
            scheme: Scheme::Https,
            connect_timeout_ms: 60_000,
            request_timeout_ms: 60_000,
            read_ratelimit_mb: 50,
        }
    }
}

/// Direct I/O writer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectIoConfig {
    /// Download through the direct I/O sink by default
    pub enabled: bool,
    /// Writer buffer size as a multiple of the OS page size
    pub buffer_pages: usize,
}

impl Default for DirectIoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_pages: 1,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.s3.region, "us-east-1");
        assert_eq!(config.s3.scheme, Scheme::Https);
        assert_eq!(config.s3.connect_timeout_ms, 60_000);
        assert_eq!(config.s3.read_ratelimit_mb, 50);
        assert_eq!(config.direct_io.buffer_pages, 1);
        assert!(!config.direct_io.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [s3]
            bucket = "models"
            endpoint_override = "localhost:9000"
            scheme = "http"

            [direct_io]
            buffer_pages = 256
            "#,
        )
        .unwrap();

        assert_eq!(config.s3.bucket, "models");
        assert_eq!(config.s3.endpoint_override.as_deref(), Some("localhost:9000"));
        assert_eq!(config.s3.scheme, Scheme::Http);
        assert_eq!(config.s3.request_timeout_ms, 60_000);
        assert_eq!(config.direct_io.buffer_pages, 256);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_bucket() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_zero_pages() {
        let mut config = Config::default();
        config.s3.bucket = "b".into();
        config.direct_io.buffer_pages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = Config::from_file("/nonexistent/s3direct.toml").unwrap_err();
        assert!(matches!(missing, Error::FileIo { .. }));
    }

    #[test]
    fn test_bad_toml() {
        let err = Config::from_toml("[s3\nbucket=").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
