//! Session registry and scheduler tests

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pylon_config::SchedulerConfig;
use pylon_metrics::ServerMetrics;
use pylon_protocol::{ControlMessage, Heartbeat};
use pylon_store::{ChunkStore, OffsetTracker};

use super::scheduler::RequestScheduler;
use super::session::SessionRegistry;

#[tokio::test]
async fn test_register_send_unregister() {
    let registry = SessionRegistry::new();
    let cancel = CancellationToken::new();

    let (handle, mut rx) = registry.register("s1", cancel);
    assert!(registry.is_active("s1"));
    assert_eq!(registry.len(), 1);

    let message = ControlMessage::Heartbeat(Heartbeat {
        last_committed_sequence: 1,
        queue_depth: 0,
    });
    assert!(registry.send("s1", message.clone()));
    assert_eq!(rx.recv().await.unwrap(), message);

    assert!(registry.unregister("s1", handle.session_id));
    assert!(!registry.is_active("s1"));
    assert!(!registry.send("s1", message));
}

#[tokio::test]
async fn test_newer_session_supersedes() {
    let registry = SessionRegistry::new();

    let old_cancel = CancellationToken::new();
    let (old_handle, _old_rx) = registry.register("s1", old_cancel.clone());

    let (new_handle, mut new_rx) = registry.register("s1", CancellationToken::new());

    // The prior session's task was cancelled
    assert!(old_cancel.is_cancelled());
    assert_eq!(registry.len(), 1);

    // Messages land on the new session
    let message = ControlMessage::Error("ping".into());
    assert!(registry.send("s1", message.clone()));
    assert_eq!(new_rx.recv().await.unwrap(), message);

    // The superseded task's late unregister must not evict the new session
    assert!(!registry.unregister("s1", old_handle.session_id));
    assert!(registry.is_active("s1"));

    assert!(registry.unregister("s1", new_handle.session_id));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_active_sensors_listing() {
    let registry = SessionRegistry::new();
    let (_h1, _rx1) = registry.register("s1", CancellationToken::new());
    let (_h2, _rx2) = registry.register("s2", CancellationToken::new());

    let mut sensors = registry.active_sensors();
    sensors.sort();
    assert_eq!(sensors, vec!["s1", "s2"]);
}

#[tokio::test]
async fn test_scheduler_requests_from_committed_offset() {
    let store = Arc::new(ChunkStore::open_memory().await.unwrap());
    let offsets = Arc::new(OffsetTracker::open(&store).await.unwrap());
    let registry = Arc::new(SessionRegistry::new());
    let metrics = Arc::new(ServerMetrics::new());

    let scheduler = RequestScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&offsets),
        SchedulerConfig {
            max_chunks: 8,
            max_bytes: 1024,
            max_in_flight: 4,
        },
        metrics,
    );

    // Offline sensor: no-op
    assert!(!scheduler.request_sensor("s1"));

    let (_handle, mut rx) = registry.register("s1", CancellationToken::new());
    assert!(scheduler.request_sensor("s1"));

    match rx.recv().await.unwrap() {
        ControlMessage::ChunkRequest(request) => {
            assert_eq!(request.since_sequence, 0);
            assert_eq!(request.max_chunks, 8);
            assert_eq!(request.max_bytes, 1024);
            assert_eq!(request.max_in_flight, 4);
            assert!(request.window_id.starts_with("s1-"));
        }
        other => panic!("expected ChunkRequest, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_all_skips_offline() {
    let store = Arc::new(ChunkStore::open_memory().await.unwrap());
    let offsets = Arc::new(OffsetTracker::open(&store).await.unwrap());
    let registry = Arc::new(SessionRegistry::new());

    let scheduler = RequestScheduler::new(
        Arc::clone(&registry),
        offsets,
        SchedulerConfig::default(),
        Arc::new(ServerMetrics::new()),
    );

    assert_eq!(scheduler.request_all(), 0);

    let (_h1, _rx1) = registry.register("s1", CancellationToken::new());
    let (_h2, _rx2) = registry.register("s2", CancellationToken::new());
    assert_eq!(scheduler.request_all(), 2);
}
