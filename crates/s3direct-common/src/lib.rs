//! s3direct Common - Shared types and utilities
//!
//! This crate provides the error definitions and configuration types
//! used across all s3direct components.

pub mod config;
pub mod error;

pub use config::{Config, DirectIoConfig, LoggingConfig, S3Config, Scheme};
pub use error::{Error, Result};
