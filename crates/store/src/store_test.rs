//! Chunk store, offset tracker, and snapshot cache tests

use pylon_protocol::{encode_hash, split, Compression, DataChunk, MIN_CHUNK_SIZE};
use sha2::{Digest, Sha256};

use super::error::StoreError;
use super::offsets::OffsetTracker;
use super::snapshot::SnapshotCache;
use super::store::{ChunkStore, WriteOutcome};

const SENSOR: &str = "sensor-1";

/// Split a payload and assign sequences starting at `first_sequence`
fn data_chunks(event_id: &str, payload: &[u8], first_sequence: u64) -> Vec<DataChunk> {
    split(payload, event_id, MIN_CHUNK_SIZE, Compression::Gzip)
        .unwrap()
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            DataChunk::from_event_chunk(
                SENSOR,
                first_sequence + i as u64,
                "2026-08-06T00:00:00+00:00",
                chunk,
            )
        })
        .collect()
}

fn payload_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 241) as u8).collect()
}

#[tokio::test]
async fn test_write_and_complete_single_chunk_event() {
    let store = ChunkStore::open_memory().await.unwrap();
    let payload = payload_of(1000);
    let chunks = data_chunks("ev1", &payload, 1);

    let outcome = store.write(&chunks[0]).await.unwrap();
    match outcome {
        WriteOutcome::Accepted { completed: Some(event) } => {
            assert_eq!(event.sensor_id, SENSOR);
            assert_eq!(event.event_id, "ev1");
            assert_eq!(event.payload.as_ref(), payload.as_slice());
        }
        other => panic!("expected completed event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_write_is_idempotent() {
    let store = ChunkStore::open_memory().await.unwrap();
    let tracker = OffsetTracker::open(&store).await.unwrap();
    let chunks = data_chunks("ev1", &payload_of(100), 1);

    assert!(store.write(&chunks[0]).await.unwrap().is_accepted());
    tracker.advance(&store, SENSOR).await.unwrap();
    let committed = tracker.committed(SENSOR);
    assert_eq!(committed, 1);

    // Second write of the same chunk: no-op, committed unchanged
    let outcome = store.write(&chunks[0]).await.unwrap();
    assert!(matches!(outcome, WriteOutcome::DuplicateIgnored));
    tracker.advance(&store, SENSOR).await.unwrap();
    assert_eq!(tracker.committed(SENSOR), committed);

    assert_eq!(store.sequences_after(SENSOR, 0).await.unwrap(), vec![1]);
}

#[tokio::test]
async fn test_same_key_different_hash_is_fatal() {
    let store = ChunkStore::open_memory().await.unwrap();
    let chunks = data_chunks("ev1", &payload_of(100), 1);
    store.write(&chunks[0]).await.unwrap();

    // A different chunk claiming the same (sensor, sequence) key
    let mut conflicting = data_chunks("ev2", &payload_of(200), 1)[0].clone();
    conflicting.sequence = 1;

    let result = store.write(&conflicting).await;
    assert!(matches!(result, Err(StoreError::HashConflict { sequence: 1 })));
}

#[tokio::test]
async fn test_bad_chunk_hash_rejected_and_not_persisted() {
    let store = ChunkStore::open_memory().await.unwrap();
    let tracker = OffsetTracker::open(&store).await.unwrap();

    let mut chunk = data_chunks("ev1", &payload_of(100), 1)[0].clone();
    chunk.chunk_sha256 = encode_hash(&Sha256::digest(b"something else").into());

    let result = store.write(&chunk).await;
    assert!(matches!(
        result,
        Err(StoreError::ChunkHashMismatch { sequence: 1 })
    ));
    assert!(result.unwrap_err().is_integrity());

    // Nothing persisted, committed unchanged
    assert!(store.sequences_after(SENSOR, 0).await.unwrap().is_empty());
    assert_eq!(tracker.advance(&store, SENSOR).await.unwrap(), 0);
}

#[tokio::test]
async fn test_gap_blocks_advancement_until_filled() {
    let store = ChunkStore::open_memory().await.unwrap();
    let tracker = OffsetTracker::open(&store).await.unwrap();
    let cache = SnapshotCache::new();

    // One event, three chunks, sequences 1..=3
    let payload = payload_of(MIN_CHUNK_SIZE * 2 + 500);
    let chunks = data_chunks("ev1", &payload, 1);
    assert_eq!(chunks.len(), 3);

    // Chunks 1 and 3 arrive; 2 is lost in transit
    store.write(&chunks[0]).await.unwrap();
    store.write(&chunks[2]).await.unwrap();
    assert_eq!(tracker.advance(&store, SENSOR).await.unwrap(), 1);

    // Re-request resends the window; duplicates are no-ops
    assert!(matches!(
        store.write(&chunks[0]).await.unwrap(),
        WriteOutcome::DuplicateIgnored
    ));

    // The missing chunk arrives: event completes, snapshot publishes,
    // committed advances over the whole run
    match store.write(&chunks[1]).await.unwrap() {
        WriteOutcome::Accepted { completed: Some(event) } => {
            assert_eq!(event.payload.as_ref(), payload.as_slice());
            let snapshot = cache.publish(&event);
            assert_eq!(snapshot.sensor_id, SENSOR);
        }
        other => panic!("expected completed event, got {other:?}"),
    }
    assert_eq!(tracker.advance(&store, SENSOR).await.unwrap(), 3);
    assert!(cache.get(SENSOR).is_some());
}

#[tokio::test]
async fn test_committed_never_regresses_or_skips() {
    let store = ChunkStore::open_memory().await.unwrap();
    let tracker = OffsetTracker::open(&store).await.unwrap();

    // Two single-chunk events with a hole between them
    store
        .write(&data_chunks("ev1", &payload_of(10), 1)[0])
        .await
        .unwrap();
    store
        .write(&data_chunks("ev3", &payload_of(10), 3)[0])
        .await
        .unwrap();

    assert_eq!(tracker.advance(&store, SENSOR).await.unwrap(), 1);
    // Repeated advance does not move past the hole
    assert_eq!(tracker.advance(&store, SENSOR).await.unwrap(), 1);

    store
        .write(&data_chunks("ev2", &payload_of(10), 2)[0])
        .await
        .unwrap();
    assert_eq!(tracker.advance(&store, SENSOR).await.unwrap(), 3);
}

#[tokio::test]
async fn test_event_hash_mismatch_marks_failed_and_reopens_gap() {
    let store = ChunkStore::open_memory().await.unwrap();
    let tracker = OffsetTracker::open(&store).await.unwrap();

    // Chunks whose per-chunk hashes are valid but whose declared event hash
    // can never match the reassembled payload
    let payload = payload_of(MIN_CHUNK_SIZE + 100);
    let bogus_event_hash = encode_hash(&Sha256::digest(b"not the payload").into());
    let mut chunks = data_chunks("ev-bad", &payload, 1);
    for chunk in &mut chunks {
        chunk.event_sha256 = bogus_event_hash.clone();
    }

    store.write(&chunks[0]).await.unwrap();
    let result = store.write(&chunks[1]).await;
    assert!(matches!(
        result,
        Err(StoreError::EventHashMismatch { .. })
    ));

    // The implicated chunks are released so the sequences get re-requested
    assert!(store.sequences_after(SENSOR, 0).await.unwrap().is_empty());
    assert_eq!(tracker.advance(&store, SENSOR).await.unwrap(), 0);
}

#[tokio::test]
async fn test_offsets_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let store = ChunkStore::open(&path).await.unwrap();
        let tracker = OffsetTracker::open(&store).await.unwrap();
        store
            .write(&data_chunks("ev1", &payload_of(50), 1)[0])
            .await
            .unwrap();
        store
            .write(&data_chunks("ev2", &payload_of(50), 2)[0])
            .await
            .unwrap();
        assert_eq!(tracker.advance(&store, SENSOR).await.unwrap(), 2);
    }

    let store = ChunkStore::open(&path).await.unwrap();
    let tracker = OffsetTracker::open(&store).await.unwrap();
    assert_eq!(tracker.committed(SENSOR), 2);
    assert!(store
        .known_sensors()
        .await
        .unwrap()
        .contains(&SENSOR.to_string()));
}

#[tokio::test]
async fn test_prune_completed_respects_retention() {
    let store = ChunkStore::open_memory().await.unwrap();
    store
        .write(&data_chunks("ev1", &payload_of(50), 1)[0])
        .await
        .unwrap();

    // Within retention: kept
    assert_eq!(
        store
            .prune_completed(std::time::Duration::from_secs(3600))
            .await
            .unwrap(),
        0
    );

    // Zero retention: completed event and its chunks go away
    assert_eq!(
        store
            .prune_completed(std::time::Duration::ZERO)
            .await
            .unwrap(),
        1
    );
    assert!(store.sequences_after(SENSOR, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_prune_does_not_regress_committed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let store = ChunkStore::open(&path).await.unwrap();
    let tracker = OffsetTracker::open(&store).await.unwrap();
    store
        .write(&data_chunks("ev1", &payload_of(50), 1)[0])
        .await
        .unwrap();
    tracker.advance(&store, SENSOR).await.unwrap();

    store
        .prune_completed(std::time::Duration::ZERO)
        .await
        .unwrap();

    // Chunks are gone but the persisted committed point stands, even after
    // a full reopen
    drop(tracker);
    let store = ChunkStore::open(&path).await.unwrap();
    let tracker = OffsetTracker::open(&store).await.unwrap();
    assert_eq!(tracker.committed(SENSOR), 1);
}

#[tokio::test]
async fn test_snapshot_cache_overwrites_and_broadcasts() {
    let store = ChunkStore::open_memory().await.unwrap();
    let cache = SnapshotCache::new();
    let mut feed = cache.subscribe();

    let first = match store
        .write(&data_chunks("ev1", b"{\"rate\": 1}", 1)[0])
        .await
        .unwrap()
    {
        WriteOutcome::Accepted { completed: Some(e) } => e,
        other => panic!("expected completion, got {other:?}"),
    };
    cache.publish(&first);

    let second = match store
        .write(&data_chunks("ev2", b"{\"rate\": 2}", 2)[0])
        .await
        .unwrap()
    {
        WriteOutcome::Accepted { completed: Some(e) } => e,
        other => panic!("expected completion, got {other:?}"),
    };
    cache.publish(&second);

    // Overwritten, not accumulated
    assert_eq!(cache.len(), 1);
    let snapshot = cache.get(SENSOR).unwrap();
    assert_eq!(snapshot.event_id, "ev2");
    assert_eq!(snapshot.payload_json["rate"], 2);

    // Both publishes arrived on the broadcast feed in order
    assert_eq!(feed.recv().await.unwrap().event_id, "ev1");
    assert_eq!(feed.recv().await.unwrap().event_id, "ev2");
}
