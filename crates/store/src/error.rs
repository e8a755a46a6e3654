//! Store error types

use thiserror::Error;

/// Errors from the server-side chunk store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] turso::Error),

    /// Recomputed chunk hash does not match the declared hash
    #[error("chunk hash mismatch for sequence {sequence}")]
    ChunkHashMismatch { sequence: u64 },

    /// A different chunk is already stored under this (sensor, sequence) key
    #[error("hash conflict for sequence {sequence}: stored chunk differs")]
    HashConflict { sequence: u64 },

    /// Chunks for the same event disagree about geometry or hash
    #[error("event metadata mismatch for event {event_id}: {message}")]
    EventMismatch { event_id: String, message: String },

    /// Reassembled event payload failed whole-event verification
    #[error("event payload hash mismatch for event {event_id}")]
    EventHashMismatch { event_id: String },

    /// Protocol-level error while decoding a chunk
    #[error(transparent)]
    Protocol(#[from] pylon_protocol::ProtocolError),

    /// Stored row could not be decoded
    #[error("invalid {field} in stored row: {message}")]
    InvalidRow {
        field: &'static str,
        message: String,
    },

    /// Store directory could not be created
    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Create an invalid-row error
    pub fn invalid_row(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRow {
            field,
            message: message.into(),
        }
    }

    /// True when the error indicates corrupted or conflicting chunk data
    /// (surfaced to operators, never silently dropped)
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::ChunkHashMismatch { .. }
                | Self::HashConflict { .. }
                | Self::EventMismatch { .. }
                | Self::EventHashMismatch { .. }
        )
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
