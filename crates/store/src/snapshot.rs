//! Snapshot cache - latest fully-assembled event per sensor
//!
//! A read-through cache so dashboard reads never touch the chunk store or
//! re-run reassembly. Publishing overwrites atomically and fans out to
//! stream subscribers over a broadcast channel.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::CompletedEvent;

/// Broadcast buffer for snapshot subscribers; slow consumers lag and skip
const BROADCAST_CAPACITY: usize = 256;

/// The latest complete event for one sensor
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Owning sensor
    pub sensor_id: String,
    /// Completed event identifier
    pub event_id: String,
    /// Event payload, base64-encoded for JSON transport
    pub payload_base64: String,
    /// Payload parsed as JSON when it is JSON, `null` otherwise
    pub payload_json: serde_json::Value,
    /// Payload size in bytes
    pub total_bytes: u64,
    /// When the event completed server-side
    pub completed_at: DateTime<Utc>,
    /// When this cache entry was written
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    fn from_event(event: &CompletedEvent) -> Self {
        let payload_json =
            serde_json::from_slice(&event.payload).unwrap_or(serde_json::Value::Null);
        Self {
            sensor_id: event.sensor_id.clone(),
            event_id: event.event_id.clone(),
            payload_base64: STANDARD.encode(&event.payload),
            payload_json,
            total_bytes: event.total_bytes,
            completed_at: event.completed_at,
            updated_at: Utc::now(),
        }
    }
}

/// In-memory, read-optimized map of sensor → latest complete event
pub struct SnapshotCache {
    snapshots: RwLock<HashMap<String, Snapshot>>,
    tx: broadcast::Sender<Snapshot>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    /// Create an empty cache
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            snapshots: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Overwrite the sensor's snapshot with a newly completed event and
    /// notify stream subscribers
    pub fn publish(&self, event: &CompletedEvent) -> Snapshot {
        let snapshot = Snapshot::from_event(event);
        self.snapshots
            .write()
            .insert(snapshot.sensor_id.clone(), snapshot.clone());
        // Only fails when nobody is subscribed, which is fine
        let _ = self.tx.send(snapshot.clone());
        snapshot
    }

    /// Latest snapshot for a sensor, if any event has completed
    pub fn get(&self, sensor_id: &str) -> Option<Snapshot> {
        self.snapshots.read().get(sensor_id).cloned()
    }

    /// All current snapshots
    pub fn all(&self) -> Vec<Snapshot> {
        self.snapshots.read().values().cloned().collect()
    }

    /// Number of sensors with a cached snapshot
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// True when no sensor has completed an event yet
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    /// Subscribe to live snapshot publishes
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }
}
