//! Auth error types

use thiserror::Error;

/// Errors from credential loading and validation
#[derive(Debug, Error)]
pub enum AuthError {
    /// Failed to read a credentials file
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed line in a credentials file
    #[error("invalid credentials entry at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Sensor is not in the authorized registry or presented a bad token
    #[error("unauthorized sensor: {0}")]
    UnauthorizedSensor(String),
}

impl AuthError {
    /// Create an I/O error with path context
    pub fn io_error(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}

/// Result type for auth operations
pub type Result<T> = std::result::Result<T, AuthError>;
