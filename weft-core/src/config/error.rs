//! Configuration error types

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Failed to read config file: {0}")]
    FileReadError(String),

    #[error("Failed to parse config file: {0}")]
    ParseError(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
