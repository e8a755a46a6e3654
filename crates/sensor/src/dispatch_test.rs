//! Dispatcher flow-control tests

use std::sync::Arc;
use std::time::Duration;

use pylon_protocol::{split, ChunkRequest, Compression, MIN_CHUNK_SIZE};
use pylon_queue::DurableQueue;

use super::dispatch::ChunkDispatcher;

async fn queue_with(entries: usize) -> Arc<DurableQueue> {
    let queue = Arc::new(DurableQueue::open_memory().await.unwrap());
    for i in 0..entries {
        let payload: Vec<u8> = vec![i as u8; 64];
        let chunks = split(
            &payload,
            &format!("ev{i}"),
            MIN_CHUNK_SIZE,
            Compression::None,
        )
        .unwrap();
        queue.enqueue(&chunks).await.unwrap();
    }
    queue
}

fn request(window_id: &str, since: u64, max_chunks: u32, max_in_flight: u32) -> ChunkRequest {
    ChunkRequest {
        since_sequence: since,
        max_chunks,
        max_bytes: u64::MAX,
        window_id: window_id.into(),
        max_in_flight,
    }
}

#[tokio::test]
async fn test_batch_respects_max_chunks() {
    let queue = queue_with(10).await;
    let dispatcher = ChunkDispatcher::new("s1", queue);

    let batch = dispatcher
        .build_batch(&request("w1", 0, 4, 0))
        .await
        .unwrap();
    assert_eq!(batch.len(), 4);
    let sequences: Vec<u64> = batch.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert_eq!(batch[0].sensor_id, "s1");
}

#[tokio::test]
async fn test_in_flight_sequences_not_resent_to_other_windows() {
    let queue = queue_with(4).await;
    let dispatcher = ChunkDispatcher::new("s1", queue);

    let first = dispatcher
        .build_batch(&request("w1", 0, 2, 0))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);

    // A second window skips w1's sequences and picks up the rest
    let second = dispatcher
        .build_batch(&request("w2", 0, 10, 0))
        .await
        .unwrap();
    let sequences: Vec<u64> = second.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![3, 4]);
}

#[tokio::test]
async fn test_same_window_may_rebuild_its_batch() {
    let queue = queue_with(2).await;
    let dispatcher = ChunkDispatcher::new("s1", queue);

    let first = dispatcher
        .build_batch(&request("w1", 0, 10, 0))
        .await
        .unwrap();
    let again = dispatcher
        .build_batch(&request("w1", 0, 10, 0))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn test_max_in_flight_caps_across_windows() {
    let queue = queue_with(6).await;
    let dispatcher = ChunkDispatcher::new("s1", queue);

    let first = dispatcher
        .build_batch(&request("w1", 0, 3, 3))
        .await
        .unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(dispatcher.in_flight(), 3);

    // The cap is already reached; a new window gets nothing
    let second = dispatcher
        .build_batch(&request("w2", 0, 10, 3))
        .await
        .unwrap();
    assert!(second.is_empty());

    // Acking frees capacity
    dispatcher.handle_ack(3).await.unwrap();
    let third = dispatcher
        .build_batch(&request("w3", 3, 10, 3))
        .await
        .unwrap();
    assert_eq!(third.len(), 3);
}

#[tokio::test]
async fn test_handle_ack_prunes_and_releases() {
    let queue = queue_with(5).await;
    let dispatcher = ChunkDispatcher::new("s1", Arc::clone(&queue));

    dispatcher
        .build_batch(&request("w1", 0, 5, 0))
        .await
        .unwrap();
    assert_eq!(dispatcher.in_flight(), 5);

    let stats = dispatcher.handle_ack(3).await.unwrap();
    assert_eq!(stats.deleted, 3);
    assert_eq!(stats.remaining, 2);
    assert_eq!(dispatcher.in_flight(), 2);
    assert_eq!(dispatcher.last_ack_sequence(), 3);

    // A stale (lower) ack never regresses anything
    let stats = dispatcher.handle_ack(1).await.unwrap();
    assert_eq!(stats.deleted, 0);
    assert_eq!(dispatcher.last_ack_sequence(), 3);
}

#[tokio::test]
async fn test_abandon_window_releases_sequences() {
    let queue = queue_with(3).await;
    let dispatcher = ChunkDispatcher::new("s1", queue);

    dispatcher
        .build_batch(&request("w1", 0, 3, 0))
        .await
        .unwrap();
    assert_eq!(dispatcher.in_flight(), 3);

    assert_eq!(dispatcher.abandon_window("w1"), 3);
    assert_eq!(dispatcher.in_flight(), 0);

    // Sequences are immediately available to a new window
    let batch = dispatcher
        .build_batch(&request("w2", 0, 10, 0))
        .await
        .unwrap();
    assert_eq!(batch.len(), 3);
}

#[tokio::test]
async fn test_expire_windows_after_timeout() {
    let queue = queue_with(2).await;
    let dispatcher = ChunkDispatcher::new("s1", queue);

    dispatcher
        .build_batch(&request("w1", 0, 2, 0))
        .await
        .unwrap();

    // Fresh window survives a long timeout
    assert_eq!(dispatcher.expire_windows(Duration::from_secs(3600)), 0);
    assert_eq!(dispatcher.in_flight(), 2);

    // Zero timeout expires it immediately
    assert_eq!(dispatcher.expire_windows(Duration::ZERO), 2);
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_build_batch_updates_attempt_metadata() {
    let queue = queue_with(1).await;
    let dispatcher = ChunkDispatcher::new("s1", Arc::clone(&queue));

    dispatcher
        .build_batch(&request("w1", 0, 1, 0))
        .await
        .unwrap();

    let window = queue.peek_range(0, 1, u64::MAX).await.unwrap();
    assert_eq!(window[0].attempt_count, 1);
}
