//! Chunk codec tests

use sha2::Digest;

use super::chunk::{assemble, random_event_id, split, Compression};
use super::error::ProtocolError;
use super::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

fn payload_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_round_trip_single_chunk() {
    let payload = payload_of(1024);
    let chunks = split(&payload, "ev1", MIN_CHUNK_SIZE, Compression::Gzip).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_count, 1);
    assert!(chunks[0].is_last());

    let assembled = assemble(&chunks).unwrap();
    assert_eq!(assembled.as_ref(), payload.as_slice());
}

#[test]
fn test_round_trip_multi_chunk() {
    // 2.5 chunks worth of data
    let payload = payload_of(MIN_CHUNK_SIZE * 2 + MIN_CHUNK_SIZE / 2);
    let chunks = split(&payload, "ev2", MIN_CHUNK_SIZE, Compression::Gzip).unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[2].chunk_index, 2);
    assert!(chunks[2].is_last());

    let assembled = assemble(&chunks).unwrap();
    assert_eq!(assembled.as_ref(), payload.as_slice());
}

#[test]
fn test_round_trip_uncompressed() {
    let payload = payload_of(MIN_CHUNK_SIZE + 7);
    let chunks = split(&payload, "ev3", MIN_CHUNK_SIZE, Compression::None).unwrap();
    assert_eq!(chunks.len(), 2);
    // Without compression the stored bytes are the raw slices
    assert_eq!(chunks[0].payload_size(), MIN_CHUNK_SIZE);
    assert_eq!(chunks[1].payload_size(), 7);

    let assembled = assemble(&chunks).unwrap();
    assert_eq!(assembled.as_ref(), payload.as_slice());
}

#[test]
fn test_empty_payload_round_trips() {
    let chunks = split(&[], "ev4", MIN_CHUNK_SIZE, Compression::Gzip).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].total_bytes, 0);

    let assembled = assemble(&chunks).unwrap();
    assert!(assembled.is_empty());
}

#[test]
fn test_chunk_count_is_ceiling() {
    let payload = payload_of(MIN_CHUNK_SIZE * 4);
    let chunks = split(&payload, "ev5", MIN_CHUNK_SIZE, Compression::None).unwrap();
    assert_eq!(chunks.len(), 4);

    let payload = payload_of(MIN_CHUNK_SIZE * 4 + 1);
    let chunks = split(&payload, "ev6", MIN_CHUNK_SIZE, Compression::None).unwrap();
    assert_eq!(chunks.len(), 5);
}

#[test]
fn test_chunk_size_out_of_range() {
    let result = split(b"x", "ev", MIN_CHUNK_SIZE - 1, Compression::None);
    assert!(matches!(
        result,
        Err(ProtocolError::ChunkSizeOutOfRange { .. })
    ));

    let result = split(b"x", "ev", MAX_CHUNK_SIZE + 1, Compression::None);
    assert!(matches!(
        result,
        Err(ProtocolError::ChunkSizeOutOfRange { .. })
    ));
}

#[test]
fn test_assemble_missing_chunk() {
    let payload = payload_of(MIN_CHUNK_SIZE * 3);
    let mut chunks = split(&payload, "ev7", MIN_CHUNK_SIZE, Compression::Gzip).unwrap();
    chunks.remove(1);

    let result = assemble(&chunks);
    match result {
        Err(ProtocolError::IncompleteEvent {
            missing,
            chunk_count,
            ..
        }) => {
            assert_eq!(missing, 1);
            assert_eq!(chunk_count, 3);
        }
        other => panic!("expected IncompleteEvent, got {other:?}"),
    }
}

#[test]
fn test_assemble_out_of_order() {
    let payload = payload_of(MIN_CHUNK_SIZE * 2 + 100);
    let mut chunks = split(&payload, "ev8", MIN_CHUNK_SIZE, Compression::Gzip).unwrap();
    chunks.reverse();

    let assembled = assemble(&chunks).unwrap();
    assert_eq!(assembled.as_ref(), payload.as_slice());
}

#[test]
fn test_assemble_tampered_chunk() {
    let payload = payload_of(MIN_CHUNK_SIZE);
    let mut chunks = split(&payload, "ev9", MIN_CHUNK_SIZE, Compression::None).unwrap();

    let mut tampered = chunks[0].payload.to_vec();
    tampered[0] ^= 0xff;
    chunks[0].payload = tampered.into();

    let result = assemble(&chunks);
    assert!(matches!(
        result,
        Err(ProtocolError::ChunkHashMismatch { chunk_index: 0, .. })
    ));
}

#[test]
fn test_assemble_event_hash_mismatch() {
    let payload = payload_of(MIN_CHUNK_SIZE);
    let mut chunks = split(&payload, "ev10", MIN_CHUNK_SIZE, Compression::None).unwrap();

    // Replace the stored bytes and fix up the chunk hash so only the
    // whole-event verification can catch the substitution.
    let substitute = payload_of(MIN_CHUNK_SIZE / 2);
    let chunk_sha256: [u8; 32] = sha2::Sha256::digest(&substitute).into();
    chunks[0].payload = substitute.into();
    chunks[0].chunk_sha256 = chunk_sha256;

    let result = assemble(&chunks);
    assert!(matches!(result, Err(ProtocolError::EventHashMismatch { .. })));
}

#[test]
fn test_assemble_geometry_mismatch() {
    let payload = payload_of(MIN_CHUNK_SIZE * 2);
    let mut chunks = split(&payload, "ev11", MIN_CHUNK_SIZE, Compression::None).unwrap();
    chunks[1].chunk_count = 5;

    let result = assemble(&chunks);
    assert!(matches!(
        result,
        Err(ProtocolError::ChunkCountMismatch { .. })
    ));
}

#[test]
fn test_random_event_id_format() {
    let id = random_event_id();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(id, random_event_id());
}
