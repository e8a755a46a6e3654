//! Pylon Metrics - internal counters and periodic reporting
//!
//! Lock-free atomic counters for the hot paths, point-in-time snapshots for
//! reporting, and a reporter task that logs every registered provider on an
//! interval. The reporter is how the conditions the pipeline cannot
//! self-heal (sustained queue depth, repeated integrity errors, missing
//! heartbeats) reach operators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// A named set of counter values, reported periodically
pub trait MetricsProvider: Send + Sync {
    /// Component identifier used in the log line
    fn component_id(&self) -> &str;

    /// Current counter values as (name, value) pairs
    fn counters(&self) -> Vec<(&'static str, u64)>;
}

/// Sensor-side pipeline metrics
#[derive(Debug, Default)]
pub struct SensorMetrics {
    /// Chunks sent over the data channel
    pub chunks_sent: AtomicU64,
    /// Stored payload bytes sent
    pub bytes_sent: AtomicU64,
    /// Failed batch send attempts
    pub send_failures: AtomicU64,
    /// Acknowledgments applied to the queue
    pub acks_received: AtomicU64,
    /// Windows opened by server requests
    pub windows_opened: AtomicU64,
    /// Windows abandoned after timeout or retry exhaustion
    pub windows_abandoned: AtomicU64,
    /// Control-channel reconnect attempts
    pub reconnects: AtomicU64,
    /// Heartbeats sent
    pub heartbeats_sent: AtomicU64,
    /// Current un-acked queue depth (gauge)
    pub queue_depth: AtomicU64,
}

impl SensorMetrics {
    /// Create a zeroed metrics instance
    pub const fn new() -> Self {
        Self {
            chunks_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            windows_opened: AtomicU64::new(0),
            windows_abandoned: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
        }
    }

    /// Record a sent chunk batch
    #[inline]
    pub fn batch_sent(&self, chunks: u64, bytes: u64) {
        self.chunks_sent.fetch_add(chunks, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a failed send attempt
    #[inline]
    pub fn send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an applied acknowledgment
    #[inline]
    pub fn ack_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an opened window
    #[inline]
    pub fn window_opened(&self) {
        self.windows_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an abandoned window
    #[inline]
    pub fn window_abandoned(&self) {
        self.windows_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a control-channel reconnect
    #[inline]
    pub fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sent heartbeat
    #[inline]
    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the queue depth gauge
    #[inline]
    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }
}

impl MetricsProvider for SensorMetrics {
    fn component_id(&self) -> &str {
        "sensor"
    }

    fn counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("chunks_sent", self.chunks_sent.load(Ordering::Relaxed)),
            ("bytes_sent", self.bytes_sent.load(Ordering::Relaxed)),
            ("send_failures", self.send_failures.load(Ordering::Relaxed)),
            ("acks_received", self.acks_received.load(Ordering::Relaxed)),
            ("windows_opened", self.windows_opened.load(Ordering::Relaxed)),
            (
                "windows_abandoned",
                self.windows_abandoned.load(Ordering::Relaxed),
            ),
            ("reconnects", self.reconnects.load(Ordering::Relaxed)),
            ("heartbeats_sent", self.heartbeats_sent.load(Ordering::Relaxed)),
            ("queue_depth", self.queue_depth.load(Ordering::Relaxed)),
        ]
    }
}

/// Collector-side pipeline metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Chunks accepted and stored
    pub chunks_accepted: AtomicU64,
    /// Duplicate chunks ignored
    pub chunks_duplicate: AtomicU64,
    /// Chunks rejected for integrity failures
    pub integrity_errors: AtomicU64,
    /// Events fully reassembled and verified
    pub events_completed: AtomicU64,
    /// Events that failed whole-payload verification
    pub events_failed: AtomicU64,
    /// Rejected registrations and data-channel auth failures
    pub auth_failures: AtomicU64,
    /// Live control sessions (gauge)
    pub sessions_active: AtomicU64,
    /// Heartbeats received from sensors
    pub heartbeats_received: AtomicU64,
    /// Chunk requests pushed to sensors
    pub chunk_requests_sent: AtomicU64,
    /// Snapshots published to the cache
    pub snapshots_published: AtomicU64,
}

impl ServerMetrics {
    /// Create a zeroed metrics instance
    pub const fn new() -> Self {
        Self {
            chunks_accepted: AtomicU64::new(0),
            chunks_duplicate: AtomicU64::new(0),
            integrity_errors: AtomicU64::new(0),
            events_completed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
            chunk_requests_sent: AtomicU64::new(0),
            snapshots_published: AtomicU64::new(0),
        }
    }

    /// Record an accepted chunk
    #[inline]
    pub fn chunk_accepted(&self) {
        self.chunks_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate chunk
    #[inline]
    pub fn chunk_duplicate(&self) {
        self.chunks_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an integrity failure
    #[inline]
    pub fn integrity_error(&self) {
        self.integrity_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed event
    #[inline]
    pub fn event_completed(&self) {
        self.events_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed event
    #[inline]
    pub fn event_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an authentication failure
    #[inline]
    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session opening
    #[inline]
    pub fn session_opened(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session closing
    #[inline]
    pub fn session_closed(&self) {
        // Saturating decrement; a supersede can race the close notification
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Record a received heartbeat
    #[inline]
    pub fn heartbeat_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pushed chunk request
    #[inline]
    pub fn chunk_request_sent(&self) {
        self.chunk_requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a published snapshot
    #[inline]
    pub fn snapshot_published(&self) {
        self.snapshots_published.fetch_add(1, Ordering::Relaxed);
    }
}

impl MetricsProvider for ServerMetrics {
    fn component_id(&self) -> &str {
        "server"
    }

    fn counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("chunks_accepted", self.chunks_accepted.load(Ordering::Relaxed)),
            ("chunks_duplicate", self.chunks_duplicate.load(Ordering::Relaxed)),
            ("integrity_errors", self.integrity_errors.load(Ordering::Relaxed)),
            ("events_completed", self.events_completed.load(Ordering::Relaxed)),
            ("events_failed", self.events_failed.load(Ordering::Relaxed)),
            ("auth_failures", self.auth_failures.load(Ordering::Relaxed)),
            ("sessions_active", self.sessions_active.load(Ordering::Relaxed)),
            (
                "heartbeats_received",
                self.heartbeats_received.load(Ordering::Relaxed),
            ),
            (
                "chunk_requests_sent",
                self.chunk_requests_sent.load(Ordering::Relaxed),
            ),
            (
                "snapshots_published",
                self.snapshots_published.load(Ordering::Relaxed),
            ),
        ]
    }
}

/// Periodic reporter logging every registered provider
pub struct MetricsReporter {
    providers: Vec<Arc<dyn MetricsProvider>>,
    interval: Duration,
}

impl MetricsReporter {
    /// Create a reporter with the given interval
    pub fn new(interval: Duration) -> Self {
        Self {
            providers: Vec::new(),
            interval,
        }
    }

    /// Register a provider
    pub fn register(&mut self, provider: Arc<dyn MetricsProvider>) {
        self.providers.push(provider);
    }

    /// Log every provider once
    pub fn report_once(&self) {
        for provider in &self.providers {
            let counters = self.format_counters(provider.as_ref());
            info!(component = provider.component_id(), %counters, "metrics");
        }
    }

    fn format_counters(&self, provider: &dyn MetricsProvider) -> String {
        provider
            .counters()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the reporting loop until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the first report has
        // a full interval of data behind it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.report_once();
                    break;
                }
                _ = interval.tick() => {
                    self.report_once();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_metrics_counters() {
        let metrics = SensorMetrics::new();
        metrics.batch_sent(3, 1024);
        metrics.batch_sent(2, 512);
        metrics.send_failure();
        metrics.set_queue_depth(9);

        let counters = metrics.counters();
        let get = |name: &str| {
            counters
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| *v)
                .unwrap()
        };
        assert_eq!(get("chunks_sent"), 5);
        assert_eq!(get("bytes_sent"), 1536);
        assert_eq!(get("send_failures"), 1);
        assert_eq!(get("queue_depth"), 9);
    }

    #[test]
    fn test_server_session_gauge_saturates() {
        let metrics = ServerMetrics::new();
        metrics.session_opened();
        metrics.session_closed();
        metrics.session_closed(); // extra close must not underflow
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_reporter_formats_counters() {
        let metrics = Arc::new(ServerMetrics::new());
        metrics.chunk_accepted();

        let mut reporter = MetricsReporter::new(Duration::from_secs(60));
        reporter.register(metrics.clone());
        let line = reporter.format_counters(metrics.as_ref());
        assert!(line.contains("chunks_accepted=1"));
        assert!(line.contains("sessions_active=0"));
    }
}
