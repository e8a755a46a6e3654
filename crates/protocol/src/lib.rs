//! Pylon Protocol - Core types for the sensor-to-collector pipeline
//!
//! This crate provides the types that flow between sensors and the
//! collector:
//! - `EventChunk` / `split` / `assemble` - chunk codec with integrity hashing
//! - `ControlMessage` - length-prefixed binary control-channel messages
//! - `DataChunk` / `IngestRequest` / `IngestResponse` - data-channel types
//!
//! # Design Principles
//!
//! - **Pure codec**: splitting and reassembly have no side effects
//! - **Integrity first**: every chunk carries a sha256 of its stored bytes,
//!   every event a sha256 of the uncompressed payload
//! - **Self-contained framing**: control messages are hand-framed
//!   (4-byte big-endian length + type tag), no schema compiler required

mod chunk;
mod error;
mod wire;

pub use chunk::{assemble, random_event_id, split, Compression, EventChunk};
pub use error::ProtocolError;
pub use wire::{
    encode_hash, read_length_prefix, ChunkAck, ChunkRequest, ControlMessage, DataChunk,
    Heartbeat, IngestRequest, IngestResponse, Register, SequenceError, LENGTH_PREFIX_SIZE,
};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Default maximum uncompressed bytes per chunk (128 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Smallest supported chunk size (64 KiB)
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;

/// Largest supported chunk size (256 KiB)
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Maximum framed control message size (1 MiB)
pub const MAX_CONTROL_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Wire schema version carried by data-channel payloads
pub const SCHEMA_VERSION: u32 = 1;

// Test modules - only compiled during testing
#[cfg(test)]
mod chunk_test;
#[cfg(test)]
mod wire_test;
