//! Wire types for the control and data channels
//!
//! The control channel carries length-prefixed binary messages:
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────────────────┐
//! │ 4 bytes      │ 1 byte   │ N bytes                  │
//! │ length (BE)  │ type tag │ payload                  │
//! └──────────────┴──────────┴──────────────────────────┘
//! ```
//!
//! # Message Types
//!
//! - `Register` (0x01): Sensor → Server, authenticate a session
//! - `Registered` (0x02): Server → Sensor, session accepted
//! - `Heartbeat` (0x03): Sensor → Server, liveness + queue depth
//! - `ChunkRequest` (0x04): Server → Sensor, open a flow-controlled window
//! - `ChunkAck` (0x05): Server → Sensor, cumulative committed sequence
//! - `Error` (0x06): Server → Sensor, fatal session error before close
//!
//! The data channel is HTTP; its body types (`DataChunk`, `IngestRequest`,
//! `IngestResponse`) are JSON with base64 payloads and hex hashes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::chunk::{Compression, EventChunk};
use crate::error::ProtocolError;
use crate::{Result, SCHEMA_VERSION};

/// Length prefix size (4 bytes, big-endian u32)
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Message type discriminants
const MSG_REGISTER: u8 = 0x01;
const MSG_REGISTERED: u8 = 0x02;
const MSG_HEARTBEAT: u8 = 0x03;
const MSG_CHUNK_REQUEST: u8 = 0x04;
const MSG_CHUNK_ACK: u8 = 0x05;
const MSG_ERROR: u8 = 0x06;

/// Session registration, the first message on every control connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Register {
    /// Sensor identity
    pub sensor_id: String,
    /// Opaque credential from the authorized-sensor registry
    pub token: String,
    /// Sensor software version, for fleet visibility
    pub software_version: String,
    /// Capability strings (informational)
    pub capabilities: Vec<String>,
}

/// Sensor liveness report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// Highest sequence the sensor believes is committed server-side
    pub last_committed_sequence: u64,
    /// Un-acked entries in the sensor's durable queue
    pub queue_depth: u64,
}

/// Server request for a flow-controlled window of chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Send chunks with sequence strictly greater than this
    pub since_sequence: u64,
    /// Maximum chunks in the window
    pub max_chunks: u32,
    /// Maximum total stored payload bytes in the window
    pub max_bytes: u64,
    /// Identifier tying the window's batches and acks together
    pub window_id: String,
    /// Cap on concurrent unacknowledged sequences (0 = unlimited)
    pub max_in_flight: u32,
}

/// Cumulative acknowledgment: everything up to and including
/// `committed_upto_sequence` is durably stored server-side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAck {
    /// Window this ack responds to
    pub window_id: String,
    /// High-water mark of contiguously committed sequences
    pub committed_upto_sequence: u64,
}

/// Messages exchanged over the control channel
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Sensor → Server: authenticate
    Register(Register),
    /// Server → Sensor: session accepted, with the committed high-water mark
    Registered { committed_sequence: u64 },
    /// Sensor → Server: liveness + queue depth
    Heartbeat(Heartbeat),
    /// Server → Sensor: open a window
    ChunkRequest(ChunkRequest),
    /// Server → Sensor: cumulative ack
    ChunkAck(ChunkAck),
    /// Server → Sensor: fatal error before close
    Error(String),
}

impl ControlMessage {
    /// Encode message to bytes with length prefix
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);

        // Reserve space for length prefix (filled in at end)
        buf.put_u32(0);

        match self {
            ControlMessage::Register(reg) => {
                buf.put_u8(MSG_REGISTER);
                encode_string(&reg.sensor_id, &mut buf);
                encode_string(&reg.token, &mut buf);
                encode_string(&reg.software_version, &mut buf);
                buf.put_u32(reg.capabilities.len() as u32);
                for cap in &reg.capabilities {
                    encode_string(cap, &mut buf);
                }
            }
            ControlMessage::Registered { committed_sequence } => {
                buf.put_u8(MSG_REGISTERED);
                buf.put_u64(*committed_sequence);
            }
            ControlMessage::Heartbeat(hb) => {
                buf.put_u8(MSG_HEARTBEAT);
                buf.put_u64(hb.last_committed_sequence);
                buf.put_u64(hb.queue_depth);
            }
            ControlMessage::ChunkRequest(req) => {
                buf.put_u8(MSG_CHUNK_REQUEST);
                buf.put_u64(req.since_sequence);
                buf.put_u32(req.max_chunks);
                buf.put_u64(req.max_bytes);
                encode_string(&req.window_id, &mut buf);
                buf.put_u32(req.max_in_flight);
            }
            ControlMessage::ChunkAck(ack) => {
                buf.put_u8(MSG_CHUNK_ACK);
                encode_string(&ack.window_id, &mut buf);
                buf.put_u64(ack.committed_upto_sequence);
            }
            ControlMessage::Error(msg) => {
                buf.put_u8(MSG_ERROR);
                encode_string(msg, &mut buf);
            }
        }

        // Write length prefix (excluding the 4-byte length field itself)
        let len = (buf.len() - LENGTH_PREFIX_SIZE) as u32;
        buf[0..LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());

        buf.freeze()
    }

    /// Decode message from bytes (without length prefix)
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.is_empty() {
            return Err(ProtocolError::truncated("empty message"));
        }

        let msg_type = buf.get_u8();
        match msg_type {
            MSG_REGISTER => {
                let sensor_id = decode_string(&mut buf, "sensor_id")?;
                let token = decode_string(&mut buf, "token")?;
                let software_version = decode_string(&mut buf, "software_version")?;
                let count = decode_u32(&mut buf, "capability count")? as usize;
                let mut capabilities = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    capabilities.push(decode_string(&mut buf, "capability")?);
                }
                Ok(ControlMessage::Register(Register {
                    sensor_id,
                    token,
                    software_version,
                    capabilities,
                }))
            }
            MSG_REGISTERED => Ok(ControlMessage::Registered {
                committed_sequence: decode_u64(&mut buf, "committed_sequence")?,
            }),
            MSG_HEARTBEAT => Ok(ControlMessage::Heartbeat(Heartbeat {
                last_committed_sequence: decode_u64(&mut buf, "last_committed_sequence")?,
                queue_depth: decode_u64(&mut buf, "queue_depth")?,
            })),
            MSG_CHUNK_REQUEST => Ok(ControlMessage::ChunkRequest(ChunkRequest {
                since_sequence: decode_u64(&mut buf, "since_sequence")?,
                max_chunks: decode_u32(&mut buf, "max_chunks")?,
                max_bytes: decode_u64(&mut buf, "max_bytes")?,
                window_id: decode_string(&mut buf, "window_id")?,
                max_in_flight: decode_u32(&mut buf, "max_in_flight")?,
            })),
            MSG_CHUNK_ACK => Ok(ControlMessage::ChunkAck(ChunkAck {
                window_id: decode_string(&mut buf, "window_id")?,
                committed_upto_sequence: decode_u64(&mut buf, "committed_upto_sequence")?,
            })),
            MSG_ERROR => Ok(ControlMessage::Error(decode_string(&mut buf, "error")?)),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

// ============================================================================
// Data channel (HTTP) body types
// ============================================================================

/// A queued chunk as it travels over the data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChunk {
    /// Wire schema version
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Owning sensor
    pub sensor_id: String,
    /// Event this chunk belongs to (32 hex chars)
    pub event_id: String,
    /// Queue-assigned sequence, unique per sensor
    pub sequence: u64,
    /// Position within the event
    pub chunk_index: u32,
    /// Total chunks in the event
    pub chunk_count: u32,
    /// Compression codec name (`none`, `gzip`)
    pub compression: String,
    /// Stored chunk bytes, base64-encoded
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// sha256 of the stored chunk bytes, hex-encoded
    pub chunk_sha256: String,
    /// sha256 of the uncompressed event payload, hex-encoded
    pub event_sha256: String,
    /// Uncompressed size of the whole event
    pub total_bytes: u64,
    /// When the chunk was enqueued on the sensor (RFC 3339)
    pub enqueued_at: String,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl DataChunk {
    /// Build a data-channel chunk from a codec chunk plus queue metadata
    pub fn from_event_chunk(
        sensor_id: &str,
        sequence: u64,
        enqueued_at: &str,
        chunk: &EventChunk,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            sensor_id: sensor_id.to_string(),
            event_id: chunk.event_id.clone(),
            sequence,
            chunk_index: chunk.chunk_index,
            chunk_count: chunk.chunk_count,
            compression: chunk.compression.as_str().to_string(),
            payload: chunk.payload.to_vec(),
            chunk_sha256: encode_hash(&chunk.chunk_sha256),
            event_sha256: encode_hash(&chunk.event_sha256),
            total_bytes: chunk.total_bytes,
            enqueued_at: enqueued_at.to_string(),
        }
    }

    /// Decode the declared chunk hash
    pub fn chunk_hash(&self) -> Result<[u8; 32]> {
        decode_hash(&self.chunk_sha256, "chunk_sha256")
    }

    /// Decode the declared event hash
    pub fn event_hash(&self) -> Result<[u8; 32]> {
        decode_hash(&self.event_sha256, "event_sha256")
    }

    /// Parse the compression codec name
    pub fn codec(&self) -> Result<Compression> {
        Compression::parse(&self.compression)
    }

    /// Convert into an [`EventChunk`] for reassembly
    pub fn to_event_chunk(&self) -> Result<EventChunk> {
        Ok(EventChunk {
            event_id: self.event_id.clone(),
            chunk_index: self.chunk_index,
            chunk_count: self.chunk_count,
            compression: self.codec()?,
            payload: Bytes::copy_from_slice(&self.payload),
            chunk_sha256: self.chunk_hash()?,
            event_sha256: self.event_hash()?,
            total_bytes: self.total_bytes,
        })
    }

    /// True for the chunk with the highest index
    #[inline]
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 == self.chunk_count
    }
}

/// Data-channel request body: one window's batch of chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Sending sensor; must match the authenticated identity
    pub sensor_id: String,
    /// Window this batch belongs to
    pub window_id: String,
    /// Chunks in sequence order
    pub chunks: Vec<DataChunk>,
}

/// Per-chunk rejection in an ingest response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceError {
    /// Rejected sequence
    pub sequence: u64,
    /// Human-readable reason
    pub reason: String,
}

/// Data-channel response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Sequences stored by this request
    pub accepted: Vec<u64>,
    /// Sequences already present (idempotent no-ops)
    pub duplicates: Vec<u64>,
    /// Rejected sequences with reasons
    pub errors: Vec<SequenceError>,
    /// Server's committed high-water mark for the sensor after this batch
    pub committed_sequence: u64,
}

// ============================================================================
// Encoding helpers
// ============================================================================

fn encode_string(s: &str, buf: &mut BytesMut) {
    let bytes = s.as_bytes();
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn decode_string(buf: &mut Bytes, field: &'static str) -> Result<String> {
    let len = decode_u32(buf, field)? as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::truncated(field));
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

fn decode_u32(buf: &mut Bytes, field: &'static str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::truncated(field));
    }
    Ok(buf.get_u32())
}

fn decode_u64(buf: &mut Bytes, field: &'static str) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(ProtocolError::truncated(field));
    }
    Ok(buf.get_u64())
}

/// Read a 4-byte big-endian length prefix
pub fn read_length_prefix(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Encode a hash as lowercase hex
pub fn encode_hash(hash: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn decode_hash(hex: &str, field: &'static str) -> Result<[u8; 32]> {
    if hex.len() != 64 {
        return Err(ProtocolError::truncated(field));
    }
    let mut bytes = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk).map_err(|_| ProtocolError::InvalidUtf8(field))?;
        bytes[i] =
            u8::from_str_radix(pair, 16).map_err(|_| ProtocolError::InvalidUtf8(field))?;
    }
    Ok(bytes)
}

/// serde adapter encoding `Vec<u8>` as standard base64
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
