//! Sensor role configuration

use std::time::Duration;

use serde::Deserialize;

use pylon_protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

use crate::error::{ConfigError, Result};

/// Configuration for a sensor agent
///
/// # Example
///
/// ```toml
/// [sensor]
/// id = "sensor-eu-1"
/// token = "2f9c1d6a8e4b70d3"
/// queue_path = "data/queue.db"
/// control_addr = "collector.example.com:9700"
/// ingest_url = "http://collector.example.com:9701/v1/ingest"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sensor identity, must exist in the collector's registry
    pub id: String,

    /// Provisioned credential for this sensor
    pub token: String,

    /// Path to the durable queue database
    pub queue_path: String,

    /// Collector control-channel address (host:port)
    pub control_addr: String,

    /// Collector ingest endpoint URL
    pub ingest_url: String,

    /// Maximum uncompressed bytes per chunk
    /// Default: 128 KiB
    pub chunk_bytes: usize,

    /// Chunk compression codec ("none", "gzip")
    /// Default: gzip
    pub compression: String,

    /// Retention window for un-acked queue entries
    /// Default: 72h
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// Heartbeat interval on the control channel
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Abandon an unanswered window after this long
    /// Default: 120s
    #[serde(with = "humantime_serde")]
    pub window_timeout: Duration,

    /// Maximum send attempts per batch before the window is abandoned
    /// Default: 5
    pub max_send_attempts: u32,

    /// HTTP request timeout for chunk batches
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,

    /// Sensor software version reported at registration
    /// Default: crate version
    pub software_version: String,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            token: String::new(),
            queue_path: "data/queue.db".into(),
            control_addr: "127.0.0.1:9700".into(),
            ingest_url: "http://127.0.0.1:9701/v1/ingest".into(),
            chunk_bytes: DEFAULT_CHUNK_SIZE,
            compression: "gzip".into(),
            retention: Duration::from_secs(72 * 3600),
            heartbeat_interval: Duration::from_secs(30),
            window_timeout: Duration::from_secs(120),
            max_send_attempts: 5,
            send_timeout: Duration::from_secs(30),
            software_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl SensorConfig {
    /// Validate semantic constraints
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ConfigError::validation("sensor.id must be set"));
        }
        if self.token.is_empty() {
            return Err(ConfigError::validation("sensor.token must be set"));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_bytes) {
            return Err(ConfigError::validation(format!(
                "sensor.chunk_bytes {} out of range [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]",
                self.chunk_bytes
            )));
        }
        if !matches!(self.compression.as_str(), "none" | "gzip") {
            return Err(ConfigError::validation(format!(
                "sensor.compression must be \"none\" or \"gzip\", got {:?}",
                self.compression
            )));
        }
        if self.max_send_attempts == 0 {
            return Err(ConfigError::validation(
                "sensor.max_send_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}
