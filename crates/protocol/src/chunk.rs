//! Chunk codec - split payloads into hashed chunks and reassemble them
//!
//! `split` divides an event payload into size-bounded chunks, each carrying
//! a sha256 of its stored bytes plus a sha256 of the whole uncompressed
//! payload. `assemble` is the inverse: it verifies completeness and both
//! hash levels before returning the payload.
//!
//! Chunk boundaries are computed over the *uncompressed* payload, so
//! `chunk_count = ceil(len / max_chunk_bytes)` regardless of codec. When
//! gzip is enabled each slice is compressed independently and the per-chunk
//! hash covers the compressed bytes (what actually travels and is stored).

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;
use crate::{Result, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Compression codec applied to individual chunk payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Store chunk bytes as-is
    None,
    /// Gzip each chunk independently (default)
    #[default]
    Gzip,
}

impl Compression {
    /// Wire name of the codec
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
        }
    }

    /// Parse a wire codec name
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(ProtocolError::UnsupportedCompression(other.to_string())),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bounded slice of an event payload, before it receives a persistent
/// sequence number from the durable queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventChunk {
    /// Sensor-scoped random event identifier (32 hex chars)
    pub event_id: String,
    /// Position of this chunk within the event, `0..chunk_count`
    pub chunk_index: u32,
    /// Total chunks in the event
    pub chunk_count: u32,
    /// Codec applied to `payload`
    pub compression: Compression,
    /// Stored chunk bytes (compressed when the codec says so)
    pub payload: Bytes,
    /// sha256 of `payload`
    pub chunk_sha256: [u8; 32],
    /// sha256 of the whole uncompressed event payload
    pub event_sha256: [u8; 32],
    /// Uncompressed size of the whole event in bytes
    pub total_bytes: u64,
}

impl EventChunk {
    /// Stored payload size in bytes
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// True for the chunk with the highest index
    #[inline]
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 == self.chunk_count
    }
}

/// Generate a random event identifier (16 bytes, 32 hex chars)
pub fn random_event_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn validate_chunk_size(chunk_size: usize) -> Result<usize> {
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
        return Err(ProtocolError::ChunkSizeOutOfRange {
            size: chunk_size,
            min: MIN_CHUNK_SIZE,
            max: MAX_CHUNK_SIZE,
        });
    }
    Ok(chunk_size)
}

/// Split a payload into an ordered sequence of hashed chunks
///
/// `chunk_count = ceil(len / max_chunk_bytes)`; empty payloads produce a
/// single empty chunk so the event still round-trips.
pub fn split(
    payload: &[u8],
    event_id: &str,
    max_chunk_bytes: usize,
    compression: Compression,
) -> Result<Vec<EventChunk>> {
    let max_chunk_bytes = validate_chunk_size(max_chunk_bytes)?;

    let event_sha256: [u8; 32] = Sha256::digest(payload).into();
    let total_bytes = payload.len() as u64;
    let chunk_count = payload.len().div_ceil(max_chunk_bytes).max(1) as u32;

    let mut chunks = Vec::with_capacity(chunk_count as usize);
    for index in 0..chunk_count {
        let start = index as usize * max_chunk_bytes;
        let end = (start + max_chunk_bytes).min(payload.len());
        let stored = encode_slice(&payload[start..end], compression)?;

        let chunk_sha256: [u8; 32] = Sha256::digest(&stored).into();
        chunks.push(EventChunk {
            event_id: event_id.to_string(),
            chunk_index: index,
            chunk_count,
            compression,
            payload: stored,
            chunk_sha256,
            event_sha256,
            total_bytes,
        });
    }

    Ok(chunks)
}

/// Reassemble an event payload from its chunks
///
/// Chunks may arrive in any order. Fails with `IncompleteEvent` when an
/// index is missing, `ChunkCountMismatch` when chunks disagree about the
/// event geometry, and hash-mismatch errors when stored bytes or the
/// reassembled payload fail verification.
pub fn assemble(chunks: &[EventChunk]) -> Result<Bytes> {
    let first = chunks
        .first()
        .ok_or(ProtocolError::Truncated("empty chunk set"))?;
    let event_id = &first.event_id;
    let chunk_count = first.chunk_count;

    let mut ordered: Vec<Option<&EventChunk>> = vec![None; chunk_count as usize];
    for chunk in chunks {
        if chunk.chunk_count != chunk_count || chunk.event_id != *event_id {
            return Err(ProtocolError::ChunkCountMismatch {
                event_id: event_id.clone(),
                expected: chunk_count,
                actual: chunk.chunk_count,
            });
        }
        if chunk.chunk_index < chunk_count {
            ordered[chunk.chunk_index as usize] = Some(chunk);
        }
    }

    let mut payload = Vec::with_capacity(first.total_bytes as usize);
    for (index, slot) in ordered.iter().enumerate() {
        let chunk = slot.ok_or_else(|| ProtocolError::IncompleteEvent {
            event_id: event_id.clone(),
            missing: index as u32,
            chunk_count,
        })?;

        let recomputed: [u8; 32] = Sha256::digest(&chunk.payload).into();
        if recomputed != chunk.chunk_sha256 {
            return Err(ProtocolError::ChunkHashMismatch {
                event_id: event_id.clone(),
                chunk_index: chunk.chunk_index,
            });
        }

        decode_slice(&chunk.payload, chunk.compression, &mut payload)?;
    }

    let payload_hash: [u8; 32] = Sha256::digest(&payload).into();
    if payload_hash != first.event_sha256 {
        return Err(ProtocolError::EventHashMismatch {
            event_id: event_id.clone(),
        });
    }

    Ok(Bytes::from(payload))
}

/// Encode one uncompressed slice into its stored form
fn encode_slice(slice: &[u8], compression: Compression) -> Result<Bytes> {
    match compression {
        Compression::None => Ok(Bytes::copy_from_slice(slice)),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(
                Vec::with_capacity(slice.len() / 2 + 16),
                flate2::Compression::default(),
            );
            encoder
                .write_all(slice)
                .map_err(|e| ProtocolError::Compression(e.to_string()))?;
            let compressed = encoder
                .finish()
                .map_err(|e| ProtocolError::Compression(e.to_string()))?;
            Ok(Bytes::from(compressed))
        }
    }
}

/// Decode one stored chunk payload, appending the uncompressed bytes
pub(crate) fn decode_slice(
    stored: &[u8],
    compression: Compression,
    out: &mut Vec<u8>,
) -> Result<()> {
    match compression {
        Compression::None => {
            out.extend_from_slice(stored);
            Ok(())
        }
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(stored);
            decoder
                .read_to_end(out)
                .map(|_| ())
                .map_err(|e| ProtocolError::Compression(e.to_string()))
        }
    }
}
