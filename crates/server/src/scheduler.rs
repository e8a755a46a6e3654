//! Request scheduler - on-demand chunk requests to connected sensors
//!
//! `request_sensor` pushes a `ChunkRequest` with `since_sequence` taken
//! from the offset tracker. When the sensor is offline the request is a
//! no-op: its pending data arrives on the sensor's own heartbeat schedule
//! once it reconnects.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use pylon_config::SchedulerConfig;
use pylon_metrics::ServerMetrics;
use pylon_protocol::{ChunkRequest, ControlMessage};
use pylon_store::OffsetTracker;

use crate::session::SessionRegistry;

/// Issues flow-controlled chunk requests over live control sessions
pub struct RequestScheduler {
    registry: Arc<SessionRegistry>,
    offsets: Arc<OffsetTracker>,
    limits: SchedulerConfig,
    metrics: Arc<ServerMetrics>,
}

impl RequestScheduler {
    /// Create a scheduler with the configured flow-control limits
    pub fn new(
        registry: Arc<SessionRegistry>,
        offsets: Arc<OffsetTracker>,
        limits: SchedulerConfig,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            registry,
            offsets,
            limits,
            metrics,
        }
    }

    /// Ask one sensor for fresh data since its committed sequence
    ///
    /// Returns true when a request was pushed to a live session.
    pub fn request_sensor(&self, sensor_id: &str) -> bool {
        if !self.registry.is_active(sensor_id) {
            debug!(sensor_id, "request skipped, sensor offline");
            return false;
        }

        let window_id = format!("{}-{}", sensor_id, Uuid::new_v4().simple());
        let request = ChunkRequest {
            since_sequence: self.offsets.committed(sensor_id),
            max_chunks: self.limits.max_chunks,
            max_bytes: self.limits.max_bytes,
            window_id: window_id.clone(),
            max_in_flight: self.limits.max_in_flight,
        };

        let sent = self
            .registry
            .send(sensor_id, ControlMessage::ChunkRequest(request));
        if sent {
            self.metrics.chunk_request_sent();
            debug!(sensor_id, window_id = %window_id, "chunk request pushed");
        }
        sent
    }

    /// Request fresh data from every connected sensor
    pub fn request_all(&self) -> usize {
        self.registry
            .active_sensors()
            .iter()
            .filter(|sensor_id| self.request_sensor(sensor_id))
            .count()
    }
}
