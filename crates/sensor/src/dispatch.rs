//! Chunk dispatcher - window tracking and flow-controlled batch building
//!
//! A window moves through `Idle → AwaitingRequest → Sending → AwaitingAck →
//! Idle`. The dispatcher tracks which sequences are in flight under which
//! window so overlapping requests never double-send, enforces the server's
//! `max_in_flight` cap, and prunes the queue when acks arrive.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use pylon_protocol::{ChunkRequest, DataChunk};
use pylon_queue::DurableQueue;

use crate::error::Result;

/// Outcome of applying an acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckStats {
    /// Queue entries deleted by this ack
    pub deleted: u64,
    /// Entries still pending after the ack
    pub remaining: u64,
}

#[derive(Debug)]
struct WindowState {
    sequences: HashSet<u64>,
    opened_at: Instant,
}

#[derive(Debug, Default)]
struct DispatchState {
    /// Open windows by id
    windows: HashMap<String, WindowState>,
    /// Sequence → owning window
    in_flight: HashMap<u64, String>,
}

impl DispatchState {
    fn track(&mut self, window_id: &str, sequence: u64) {
        self.windows
            .entry(window_id.to_string())
            .or_insert_with(|| WindowState {
                sequences: HashSet::new(),
                opened_at: Instant::now(),
            })
            .sequences
            .insert(sequence);
        self.in_flight.insert(sequence, window_id.to_string());
    }

    fn release_sequence(&mut self, sequence: u64) {
        let Some(window_id) = self.in_flight.remove(&sequence) else {
            return;
        };
        if let Some(window) = self.windows.get_mut(&window_id) {
            window.sequences.remove(&sequence);
            if window.sequences.is_empty() {
                self.windows.remove(&window_id);
            }
        }
    }

    fn release_window(&mut self, window_id: &str) -> usize {
        let Some(window) = self.windows.remove(window_id) else {
            return 0;
        };
        let count = window.sequences.len();
        for sequence in window.sequences {
            self.in_flight.remove(&sequence);
        }
        count
    }
}

/// Builds flow-controlled batches from the durable queue and prunes it on
/// acknowledgment
pub struct ChunkDispatcher {
    sensor_id: String,
    queue: Arc<DurableQueue>,
    state: Mutex<DispatchState>,
    last_ack_sequence: AtomicU64,
}

impl ChunkDispatcher {
    /// Create a dispatcher for the given sensor identity
    pub fn new(sensor_id: impl Into<String>, queue: Arc<DurableQueue>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            queue,
            state: Mutex::new(DispatchState::default()),
            last_ack_sequence: AtomicU64::new(0),
        }
    }

    /// Highest acknowledged sequence seen so far
    pub fn last_ack_sequence(&self) -> u64 {
        self.last_ack_sequence.load(Ordering::Relaxed)
    }

    /// Current un-acked queue depth
    pub async fn queue_depth(&self) -> Result<u64> {
        Ok(self.queue.queue_depth().await?)
    }

    /// Number of sequences currently in flight
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Build the batch for a server chunk request
    ///
    /// Honors `since_sequence`, `max_chunks`, `max_bytes`, and
    /// `max_in_flight`. Sequences already tracked under a different window
    /// are skipped; the server resolves those via ack or re-request. Each
    /// selected chunk has its attempt metadata updated.
    pub async fn build_batch(&self, request: &ChunkRequest) -> Result<Vec<DataChunk>> {
        let records = self
            .queue
            .peek_range(request.since_sequence, request.max_chunks, request.max_bytes)
            .await?;

        let mut to_send = Vec::new();
        {
            let mut state = self.state.lock();
            for record in &records {
                match state.in_flight.get(&record.sequence) {
                    // Already owned by another window
                    Some(owner) if owner != &request.window_id => continue,
                    _ => {}
                }

                if request.max_in_flight > 0
                    && state.in_flight.len() >= request.max_in_flight as usize
                    && !state.in_flight.contains_key(&record.sequence)
                {
                    break;
                }

                state.track(&request.window_id, record.sequence);
                to_send.push(record.to_data_chunk(&self.sensor_id));
            }
        }

        if !to_send.is_empty() {
            let sequences: Vec<u64> = to_send.iter().map(|c| c.sequence).collect();
            self.queue.mark_attempt(&sequences).await?;
            debug!(
                window_id = %request.window_id,
                count = to_send.len(),
                first = sequences.first().copied().unwrap_or(0),
                "built chunk batch"
            );
        }
        Ok(to_send)
    }

    /// Apply a cumulative acknowledgment: delete everything at or below
    /// `committed_upto` and release those sequences from their windows
    ///
    /// The committed sequence never regresses, so a stale ack is a no-op.
    pub async fn handle_ack(&self, committed_upto: u64) -> Result<AckStats> {
        let deleted = self.queue.ack_upto(committed_upto).await?;

        {
            let mut state = self.state.lock();
            let acked: Vec<u64> = state
                .in_flight
                .keys()
                .copied()
                .filter(|seq| *seq <= committed_upto)
                .collect();
            for sequence in acked {
                state.release_sequence(sequence);
            }
        }

        self.last_ack_sequence
            .fetch_max(committed_upto, Ordering::Relaxed);

        let remaining = self.queue.queue_depth().await?;
        Ok(AckStats { deleted, remaining })
    }

    /// Abandon one window, releasing its sequences for a future request
    pub fn abandon_window(&self, window_id: &str) -> usize {
        let released = self.state.lock().release_window(window_id);
        if released > 0 {
            debug!(window_id, released, "abandoned window");
        }
        released
    }

    /// Abandon every window older than `timeout`
    ///
    /// An unanswered window must not pin its sequences forever; after the
    /// timeout they become eligible for the next request.
    pub fn expire_windows(&self, timeout: Duration) -> usize {
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .windows
            .iter()
            .filter(|(_, w)| w.opened_at.elapsed() >= timeout)
            .map(|(id, _)| id.clone())
            .collect();

        let mut released = 0;
        for window_id in &expired {
            released += state.release_window(window_id);
            debug!(window_id = %window_id, "expired window");
        }
        released
    }
}
