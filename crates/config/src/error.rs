//! Configuration error types

use thiserror::Error;

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("failed to read {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML syntax or types
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Semantically invalid configuration
    #[error("invalid config: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
