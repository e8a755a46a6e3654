//! Integration tests for the ingest endpoint
//!
//! Exercises the full flow: auth + chunk writes + offset advancement +
//! snapshot publication, through the real axum router.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use pylon_auth::{ReaderToken, SensorRegistry};
use pylon_metrics::ServerMetrics;
use pylon_protocol::{split, Compression, DataChunk, IngestRequest, MIN_CHUNK_SIZE};
use pylon_server::{build_router, IngestState, SessionRegistry};
use pylon_store::{ChunkStore, OffsetTracker, SnapshotCache};

const SENSOR: &str = "sensor-1";
const TOKEN: &str = "sensor-token";
const READER: &str = "reader-token";

struct TestApp {
    router: axum::Router,
    state: Arc<IngestState>,
}

async fn test_app() -> TestApp {
    let store = Arc::new(ChunkStore::open_memory().await.unwrap());
    let offsets = Arc::new(OffsetTracker::open(&store).await.unwrap());
    let auth = Arc::new(SensorRegistry::from_str(&format!("{SENSOR}:{TOKEN}")).unwrap());

    let state = Arc::new(IngestState::new(
        store,
        offsets,
        Arc::new(SnapshotCache::new()),
        Arc::new(SessionRegistry::new()),
        auth,
        ReaderToken::new(READER),
        Arc::new(ServerMetrics::new()),
    ));

    TestApp {
        router: build_router(Arc::clone(&state), 8 * 1024 * 1024),
        state,
    }
}

fn chunks_for(event_id: &str, payload: &[u8], first_sequence: u64) -> Vec<DataChunk> {
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

fn ingest_request(token: &str, body: &IngestRequest) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/v1/ingest")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_ingest_accepts_and_commits() {
    let app = test_app().await;
    let chunks = chunks_for("ev1", b"{\"download_mbps\": 940.2}", 1);

    let request = IngestRequest {
        sensor_id: SENSOR.into(),
        window_id: "w1".into(),
        chunks,
    };

    let response = app
        .router
        .clone()
        .oneshot(ingest_request(TOKEN, &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["accepted"], serde_json::json!([1]));
    assert_eq!(body["duplicates"], serde_json::json!([]));
    assert_eq!(body["errors"], serde_json::json!([]));
    assert_eq!(body["committed_sequence"], 1);

    // The completed event reached the snapshot cache
    let snapshot = app.state.snapshots.get(SENSOR).unwrap();
    assert_eq!(snapshot.event_id, "ev1");
    assert_eq!(snapshot.payload_json["download_mbps"], 940.2);
}

#[tokio::test]
async fn test_ingest_rejects_bad_token() {
    let app = test_app().await;
    let request = IngestRequest {
        sensor_id: SENSOR.into(),
        window_id: "w1".into(),
        chunks: chunks_for("ev1", b"data", 1),
    };

    let response = app
        .router
        .clone()
        .oneshot(ingest_request("wrong-token", &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ingest_duplicate_batch_is_noop() {
    let app = test_app().await;
    let request = IngestRequest {
        sensor_id: SENSOR.into(),
        window_id: "w1".into(),
        chunks: chunks_for("ev1", b"payload", 1),
    };

    let first = app
        .router
        .clone()
        .oneshot(ingest_request(TOKEN, &request))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // Retried delivery of the same window
    let second = app
        .router
        .clone()
        .oneshot(ingest_request(TOKEN, &request))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    let body = body_json(second).await;
    assert_eq!(body["accepted"], serde_json::json!([]));
    assert_eq!(body["duplicates"], serde_json::json!([1]));
    assert_eq!(body["committed_sequence"], 1);
}

#[tokio::test]
async fn test_ingest_tampered_chunk_reported_per_sequence() {
    let app = test_app().await;
    let mut chunks = chunks_for("ev1", b"measurement-payload", 1);
    // Declared hash no longer matches the bytes
    chunks[0].payload[0] ^= 0xff;

    let request = IngestRequest {
        sensor_id: SENSOR.into(),
        window_id: "w1".into(),
        chunks,
    };

    let response = app
        .router
        .clone()
        .oneshot(ingest_request(TOKEN, &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["accepted"], serde_json::json!([]));
    assert_eq!(body["errors"][0]["sequence"], 1);
    // Nothing stored, nothing committed
    assert_eq!(body["committed_sequence"], 0);
    assert!(app.state.snapshots.get(SENSOR).is_none());
}

#[tokio::test]
async fn test_ingest_gap_then_fill() {
    let app = test_app().await;
    let payload: Vec<u8> = (0..MIN_CHUNK_SIZE * 2 + 100).map(|i| (i % 239) as u8).collect();
    let chunks = chunks_for("ev1", &payload, 1);
    assert_eq!(chunks.len(), 3);

    // Deliver chunks 1 and 3; 2 goes missing
    let partial = IngestRequest {
        sensor_id: SENSOR.into(),
        window_id: "w1".into(),
        chunks: vec![chunks[0].clone(), chunks[2].clone()],
    };
    let response = app
        .router
        .clone()
        .oneshot(ingest_request(TOKEN, &partial))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["accepted"], serde_json::json!([1, 3]));
    // Gap at 2 blocks the committed point
    assert_eq!(body["committed_sequence"], 1);
    assert!(app.state.snapshots.get(SENSOR).is_none());

    // A re-requested window resends all three
    let full = IngestRequest {
        sensor_id: SENSOR.into(),
        window_id: "w2".into(),
        chunks,
    };
    let response = app
        .router
        .clone()
        .oneshot(ingest_request(TOKEN, &full))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["accepted"], serde_json::json!([2]));
    assert_eq!(body["duplicates"], serde_json::json!([1, 3]));
    assert_eq!(body["committed_sequence"], 3);

    // Event now complete and visible
    let snapshot = app.state.snapshots.get(SENSOR).unwrap();
    assert_eq!(snapshot.event_id, "ev1");
}

#[tokio::test]
async fn test_ingest_rejects_foreign_sensor_chunks() {
    let app = test_app().await;
    let mut chunks = chunks_for("ev1", b"data", 1);
    chunks[0].sensor_id = "other-sensor".into();

    let request = IngestRequest {
        sensor_id: SENSOR.into(),
        window_id: "w1".into(),
        chunks,
    };

    let response = app
        .router
        .clone()
        .oneshot(ingest_request(TOKEN, &request))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["reason"], "sensor_id mismatch");
    assert_eq!(body["accepted"], serde_json::json!([]));
}

#[tokio::test]
async fn test_snapshot_endpoints_require_reader_token() {
    let app = test_app().await;

    // Populate one snapshot
    let request = IngestRequest {
        sensor_id: SENSOR.into(),
        window_id: "w1".into(),
        chunks: chunks_for("ev1", b"{\"ok\": true}", 1),
    };
    app.router
        .clone()
        .oneshot(ingest_request(TOKEN, &request))
        .await
        .unwrap();

    // Wrong token
    let response = app
        .router
        .clone()
        .oneshot(get_request(&format!("/v1/snapshots/{SENSOR}"), "nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Right token
    let response = app
        .router
        .clone()
        .oneshot(get_request(&format!("/v1/snapshots/{SENSOR}"), READER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["event_id"], "ev1");

    // Listing works too
    let response = app
        .router
        .clone()
        .oneshot(get_request("/v1/snapshots", READER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Unknown sensor is a 404
    let response = app
        .router
        .clone()
        .oneshot(get_request("/v1/snapshots/ghost", READER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_is_open() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
