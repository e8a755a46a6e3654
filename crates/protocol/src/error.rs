//! Protocol error types
//!
//! Errors that can occur when chunking payloads, reassembling events, or
//! parsing wire messages.

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Chunk size outside the supported range
    #[error("chunk size {size} out of supported range [{min}, {max}]")]
    ChunkSizeOutOfRange { size: usize, min: usize, max: usize },

    /// A chunk index in `[0, chunk_count)` is missing during reassembly
    #[error("incomplete event {event_id}: missing chunk {missing} of {chunk_count}")]
    IncompleteEvent {
        event_id: String,
        missing: u32,
        chunk_count: u32,
    },

    /// Recomputed chunk hash does not match the declared hash
    #[error("chunk hash mismatch for event {event_id} chunk {chunk_index}")]
    ChunkHashMismatch { event_id: String, chunk_index: u32 },

    /// Reassembled payload hash does not match the declared event hash
    #[error("event payload hash mismatch for event {event_id}")]
    EventHashMismatch { event_id: String },

    /// Chunks for the same event disagree about geometry or identity
    #[error("chunk count mismatch for event {event_id}: expected {expected}, got {actual}")]
    ChunkCountMismatch {
        event_id: String,
        expected: u32,
        actual: u32,
    },

    /// Message is too short to contain required fields
    #[error("truncated message: {0}")]
    Truncated(&'static str),

    /// Unknown control message type tag
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Framed message exceeds the maximum size
    #[error("message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: u32, max: u32 },

    /// Invalid UTF-8 in a string field
    #[error("invalid UTF-8 in field {0}")]
    InvalidUtf8(&'static str),

    /// Unsupported compression codec
    #[error("unsupported compression codec: {0}")]
    UnsupportedCompression(String),

    /// Compression or decompression failed
    #[error("compression error: {0}")]
    Compression(String),

    /// Invalid base64 in a JSON-encoded binary field
    #[error("invalid base64 in field {field}: {source}")]
    InvalidBase64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },
}

impl ProtocolError {
    /// Create a truncated-message error
    #[inline]
    pub fn truncated(what: &'static str) -> Self {
        Self::Truncated(what)
    }

    /// Create a message-too-large error
    #[inline]
    pub fn message_too_large(size: u32, max: u32) -> Self {
        Self::MessageTooLarge { size, max }
    }

    /// True when the error indicates corrupted or tampered data rather than
    /// a short read
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::ChunkHashMismatch { .. }
                | Self::EventHashMismatch { .. }
                | Self::ChunkCountMismatch { .. }
        )
    }
}
