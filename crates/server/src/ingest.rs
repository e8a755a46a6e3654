//! HTTP ingest endpoint and snapshot read API
//!
//! # Endpoints
//!
//! - `POST /v1/ingest` - chunk batch ingestion (sensor bearer token)
//! - `GET /v1/snapshots` - all current snapshots (reader bearer token)
//! - `GET /v1/snapshots/{sensor_id}` - one sensor's snapshot
//! - `GET /health` - health check
//!
//! Batches are validated against the authenticated sensor identity and
//! written to the chunk store in order. Mutations for a given sensor are
//! serialized with a per-sensor async lock; concurrent batches from
//! different sensors proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pylon_auth::{extract_bearer, ReaderToken, SensorRegistry};
use pylon_metrics::ServerMetrics;
use pylon_protocol::{ChunkAck, ControlMessage, IngestRequest, IngestResponse, SequenceError};
use pylon_store::{ChunkStore, OffsetTracker, SnapshotCache, WriteOutcome};

use crate::error::{Result, ServerError};
use crate::session::SessionRegistry;

/// Shared state for the ingest and snapshot handlers
pub struct IngestState {
    pub store: Arc<ChunkStore>,
    pub offsets: Arc<OffsetTracker>,
    pub snapshots: Arc<SnapshotCache>,
    pub sessions: Arc<SessionRegistry>,
    pub auth: Arc<SensorRegistry>,
    pub reader: ReaderToken,
    pub metrics: Arc<ServerMetrics>,
    /// Per-sensor write serialization
    sensor_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestState {
    /// Create handler state over the shared server components
    pub fn new(
        store: Arc<ChunkStore>,
        offsets: Arc<OffsetTracker>,
        snapshots: Arc<SnapshotCache>,
        sessions: Arc<SessionRegistry>,
        auth: Arc<SensorRegistry>,
        reader: ReaderToken,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            store,
            offsets,
            snapshots,
            sessions,
            auth,
            reader,
            metrics,
            sensor_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// The lock serializing one sensor's store mutations
    fn sensor_lock(&self, sensor_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.sensor_locks.lock();
        Arc::clone(
            locks
                .entry(sensor_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

/// Error body returned by all endpoints
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

/// POST /v1/ingest - store a window's chunk batch
pub async fn ingest_chunks(
    State(state): State<Arc<IngestState>>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Response {
    // Authenticate the sender against its registry credential
    let token = extract_bearer(
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    );
    if !state.auth.validate(&request.sensor_id, token) {
        state.metrics.auth_failure();
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "unknown sensor or bad token",
        );
    }

    if request.chunks.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty_batch", "no chunks in batch");
    }

    // Serialize this sensor's mutations; other sensors proceed in parallel
    let lock = state.sensor_lock(&request.sensor_id);
    let _guard = lock.lock().await;

    let mut accepted = Vec::new();
    let mut duplicates = Vec::new();
    let mut errors = Vec::new();

    for chunk in &request.chunks {
        // A batch may only carry chunks for its authenticated sensor
        if chunk.sensor_id != request.sensor_id {
            errors.push(SequenceError {
                sequence: chunk.sequence,
                reason: "sensor_id mismatch".into(),
            });
            continue;
        }

        match state.store.write(chunk).await {
            Ok(WriteOutcome::Accepted { completed }) => {
                state.metrics.chunk_accepted();
                accepted.push(chunk.sequence);

                if let Some(event) = completed {
                    state.metrics.event_completed();
                    state.metrics.snapshot_published();
                    let snapshot = state.snapshots.publish(&event);
                    debug!(
                        sensor_id = %event.sensor_id,
                        event_id = %event.event_id,
                        total_bytes = event.total_bytes,
                        updated_at = %snapshot.updated_at,
                        "event complete, snapshot published"
                    );
                }
            }
            Ok(WriteOutcome::DuplicateIgnored) => {
                state.metrics.chunk_duplicate();
                duplicates.push(chunk.sequence);
            }
            Err(e) if e.is_integrity() => {
                state.metrics.integrity_error();
                if matches!(e, pylon_store::StoreError::EventHashMismatch { .. }) {
                    state.metrics.event_failed();
                }
                warn!(
                    sensor_id = %request.sensor_id,
                    sequence = chunk.sequence,
                    error = %e,
                    "chunk rejected"
                );
                errors.push(SequenceError {
                    sequence: chunk.sequence,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    e.to_string(),
                );
            }
        }
    }

    // Advance the committed point over whatever is now contiguous
    let committed_sequence = match state
        .offsets
        .advance(&state.store, &request.sensor_id)
        .await
    {
        Ok(committed) => committed,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                e.to_string(),
            );
        }
    };

    // Best-effort out-of-band ack; the response carries the same committed
    // point, so a lost ack only delays queue pruning
    state.sessions.send(
        &request.sensor_id,
        ControlMessage::ChunkAck(ChunkAck {
            window_id: request.window_id.clone(),
            committed_upto_sequence: committed_sequence,
        }),
    );

    Json(IngestResponse {
        accepted,
        duplicates,
        errors,
        committed_sequence,
    })
    .into_response()
}

/// GET /v1/snapshots/{sensor_id} - one sensor's latest complete event
pub async fn get_snapshot(
    State(state): State<Arc<IngestState>>,
    Path(sensor_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(denied) = check_reader(&state, &headers) {
        return denied;
    }

    match state.snapshots.get(&sensor_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no snapshot for sensor {sensor_id}"),
        ),
    }
}

/// GET /v1/snapshots - all current snapshots
pub async fn list_snapshots(
    State(state): State<Arc<IngestState>>,
    headers: HeaderMap,
) -> Response {
    if let Some(denied) = check_reader(&state, &headers) {
        return denied;
    }
    Json(state.snapshots.all()).into_response()
}

/// GET /health - liveness probe
pub async fn health_check() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

fn check_reader(state: &IngestState, headers: &HeaderMap) -> Option<Response> {
    let token = extract_bearer(
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    );
    if state.reader.validate(token) {
        None
    } else {
        Some(error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid reader token",
        ))
    }
}

/// Build the axum router
pub fn build_router(state: Arc<IngestState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/ingest", post(ingest_chunks))
        .route("/v1/snapshots", get(list_snapshots))
        .route("/v1/snapshots/{sensor_id}", get(get_snapshot))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// The ingest HTTP server
pub struct IngestServer {
    bind_addr: String,
    state: Arc<IngestState>,
    max_body_bytes: usize,
}

impl IngestServer {
    /// Create a server
    pub fn new(bind_addr: impl Into<String>, state: Arc<IngestState>, max_body_bytes: usize) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            state,
            max_body_bytes,
        }
    }

    /// Run until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener =
            TcpListener::bind(&self.bind_addr)
                .await
                .map_err(|e| ServerError::Bind {
                    address: self.bind_addr.clone(),
                    source: e,
                })?;

        info!(address = %self.bind_addr, "ingest endpoint up");

        let app = build_router(self.state, self.max_body_bytes);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| ServerError::Http(e.to_string()))?;

        info!("ingest endpoint stopped");
        Ok(())
    }
}
