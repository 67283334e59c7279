//! Configuration error module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file extension does not name a known format.
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A source could not be read or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// A value is out of range or inconsistent with another.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
