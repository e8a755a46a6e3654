//! Wire message tests

use bytes::Bytes;

use super::chunk::{split, Compression};
use super::error::ProtocolError;
use super::wire::{
    read_length_prefix, ChunkAck, ChunkRequest, ControlMessage, DataChunk, Heartbeat,
    IngestRequest, IngestResponse, Register, LENGTH_PREFIX_SIZE,
};
use super::MIN_CHUNK_SIZE;

fn round_trip(msg: ControlMessage) -> ControlMessage {
    let encoded = msg.encode();
    let len = read_length_prefix(&encoded).unwrap() as usize;
    assert_eq!(len + LENGTH_PREFIX_SIZE, encoded.len());
    ControlMessage::decode(encoded.slice(LENGTH_PREFIX_SIZE..)).unwrap()
}

#[test]
fn test_register_round_trip() {
    let msg = ControlMessage::Register(Register {
        sensor_id: "sensor-eu-1".into(),
        token: "0123456789abcdef".into(),
        software_version: "0.3.0".into(),
        capabilities: vec!["chunks".into(), "heartbeats".into()],
    });
    assert_eq!(round_trip(msg.clone()), msg);
}

#[test]
fn test_registered_round_trip() {
    let msg = ControlMessage::Registered {
        committed_sequence: u64::MAX,
    };
    assert_eq!(round_trip(msg.clone()), msg);
}

#[test]
fn test_heartbeat_round_trip() {
    let msg = ControlMessage::Heartbeat(Heartbeat {
        last_committed_sequence: 42,
        queue_depth: 7,
    });
    assert_eq!(round_trip(msg.clone()), msg);
}

#[test]
fn test_chunk_request_round_trip() {
    let msg = ControlMessage::ChunkRequest(ChunkRequest {
        since_sequence: 9,
        max_chunks: 32,
        max_bytes: 2 * 1024 * 1024,
        window_id: "w-123".into(),
        max_in_flight: 32,
    });
    assert_eq!(round_trip(msg.clone()), msg);
}

#[test]
fn test_chunk_ack_round_trip() {
    let msg = ControlMessage::ChunkAck(ChunkAck {
        window_id: "w-123".into(),
        committed_upto_sequence: 12,
    });
    assert_eq!(round_trip(msg.clone()), msg);
}

#[test]
fn test_error_round_trip() {
    let msg = ControlMessage::Error("unauthorized sensor".into());
    assert_eq!(round_trip(msg.clone()), msg);
}

#[test]
fn test_decode_empty_message() {
    let result = ControlMessage::decode(Bytes::new());
    assert!(matches!(result, Err(ProtocolError::Truncated(_))));
}

#[test]
fn test_decode_unknown_type() {
    let result = ControlMessage::decode(Bytes::from_static(&[0x7f]));
    assert!(matches!(
        result,
        Err(ProtocolError::UnknownMessageType(0x7f))
    ));
}

#[test]
fn test_decode_truncated_fields() {
    // Encode a full ChunkRequest, then truncate at every possible boundary;
    // every prefix must produce an error, never a panic.
    let msg = ControlMessage::ChunkRequest(ChunkRequest {
        since_sequence: 1,
        max_chunks: 2,
        max_bytes: 3,
        window_id: "window".into(),
        max_in_flight: 4,
    });
    let encoded = msg.encode();
    let body = encoded.slice(LENGTH_PREFIX_SIZE..);

    for cut in 1..body.len() {
        let result = ControlMessage::decode(body.slice(..cut));
        assert!(result.is_err(), "truncation at {cut} should fail");
    }
}

#[test]
fn test_read_length_prefix() {
    assert_eq!(read_length_prefix(&[0, 0, 1, 0]), Some(256));
    assert_eq!(read_length_prefix(&[0, 0, 1]), None);
}

#[test]
fn test_data_chunk_json_round_trip() {
    let payload: Vec<u8> = (0..100u8).collect();
    let chunks = split(&payload, "abcd", MIN_CHUNK_SIZE, Compression::Gzip).unwrap();
    let chunk = DataChunk::from_event_chunk(
        "sensor-1",
        17,
        "2026-08-06T12:00:00Z",
        &chunks[0],
    );

    let json = serde_json::to_string(&chunk).unwrap();
    let decoded: DataChunk = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, chunk);

    // Hashes survive the hex round trip
    assert_eq!(decoded.chunk_hash().unwrap(), chunks[0].chunk_sha256);
    assert_eq!(decoded.event_hash().unwrap(), chunks[0].event_sha256);
    assert_eq!(decoded.codec().unwrap(), Compression::Gzip);
}

#[test]
fn test_data_chunk_back_to_event_chunk() {
    let payload: Vec<u8> = (0..200u8).collect();
    let chunks = split(&payload, "efgh", MIN_CHUNK_SIZE, Compression::Gzip).unwrap();
    let wire = DataChunk::from_event_chunk("s", 1, "2026-08-06T00:00:00Z", &chunks[0]);

    let back = wire.to_event_chunk().unwrap();
    assert_eq!(back, chunks[0]);
}

#[test]
fn test_ingest_bodies_serialize() {
    let request = IngestRequest {
        sensor_id: "sensor-1".into(),
        window_id: "w-1".into(),
        chunks: vec![],
    };
    let json = serde_json::to_string(&request).unwrap();
    let decoded: IngestRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.sensor_id, "sensor-1");

    let response: IngestResponse = serde_json::from_str(
        r#"{"accepted":[10],"duplicates":[11],"errors":[{"sequence":12,"reason":"bad hash"}],"committed_sequence":11}"#,
    )
    .unwrap();
    assert_eq!(response.accepted, vec![10]);
    assert_eq!(response.errors[0].sequence, 12);
    assert_eq!(response.committed_sequence, 11);
}

#[test]
fn test_invalid_hash_hex_rejected() {
    let mut chunk = DataChunk {
        schema_version: 1,
        sensor_id: "s".into(),
        event_id: "e".into(),
        sequence: 1,
        chunk_index: 0,
        chunk_count: 1,
        compression: "gzip".into(),
        payload: vec![],
        chunk_sha256: "zz".repeat(32),
        event_sha256: "00".repeat(32),
        total_bytes: 0,
        enqueued_at: "2026-08-06T00:00:00Z".into(),
    };
    assert!(chunk.chunk_hash().is_err());

    chunk.chunk_sha256 = "00".repeat(16); // wrong length
    assert!(chunk.chunk_hash().is_err());
}
