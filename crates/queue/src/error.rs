//! Durable queue error types

use thiserror::Error;

/// Errors from the sensor-side durable queue
#[derive(Debug, Error)]
pub enum QueueError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] turso::Error),

    /// Stored row could not be decoded
    #[error("invalid {field} in stored row: {message}")]
    InvalidRow {
        field: &'static str,
        message: String,
    },

    /// Queue directory could not be created
    #[error("failed to create queue directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Protocol error while converting stored chunks
    #[error(transparent)]
    Protocol(#[from] pylon_protocol::ProtocolError),
}

impl QueueError {
    /// Create an invalid-row error
    pub fn invalid_row(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRow {
            field,
            message: message.into(),
        }
    }
}

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
