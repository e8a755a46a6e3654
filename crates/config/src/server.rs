//! Collector role configuration

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Flow-control limits for scheduler-issued chunk requests
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum chunks per window
    /// Default: 32
    pub max_chunks: u32,

    /// Maximum stored payload bytes per window
    /// Default: 2 MiB
    pub max_bytes: u64,

    /// Cap on concurrent unacknowledged sequences per sensor
    /// Default: 32
    pub max_in_flight: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_chunks: 32,
            max_bytes: 2 * 1024 * 1024,
            max_in_flight: 32,
        }
    }
}

/// Configuration for the collector server
///
/// # Example
///
/// ```toml
/// [server]
/// control_bind = "0.0.0.0:9700"
/// ingest_bind = "0.0.0.0:9701"
/// stream_bind = "0.0.0.0:9702"
/// store_path = "data/store.db"
/// sensors_file = "sensors.conf"
/// reader_token = "dashboard-secret"
///
/// [server.scheduler]
/// max_chunks = 32
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Control-channel listener address
    pub control_bind: String,

    /// HTTP ingest listener address
    pub ingest_bind: String,

    /// Snapshot stream listener address
    pub stream_bind: String,

    /// Path to the chunk store database
    pub store_path: String,

    /// Path to the authorized-sensor registry file
    pub sensors_file: String,

    /// Bearer token required from read-side consumers (empty = open reads)
    pub reader_token: String,

    /// Retention window for completed events
    /// Default: 72h
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// How often retention pruning runs
    /// Default: 1h
    #[serde(with = "humantime_serde")]
    pub prune_interval: Duration,

    /// Maximum ingest request body size in bytes
    /// Default: 8 MiB
    pub max_body_bytes: usize,

    /// Close a control session that misses heartbeats for this long
    /// Default: 90s
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Flow-control limits for chunk requests
    pub scheduler: SchedulerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_bind: "0.0.0.0:9700".into(),
            ingest_bind: "0.0.0.0:9701".into(),
            stream_bind: "0.0.0.0:9702".into(),
            store_path: "data/store.db".into(),
            sensors_file: "sensors.conf".into(),
            reader_token: String::new(),
            retention: Duration::from_secs(72 * 3600),
            prune_interval: Duration::from_secs(3600),
            max_body_bytes: 8 * 1024 * 1024,
            session_timeout: Duration::from_secs(90),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate semantic constraints
    pub fn validate(&self) -> Result<()> {
        for (name, addr) in [
            ("server.control_bind", &self.control_bind),
            ("server.ingest_bind", &self.ingest_bind),
            ("server.stream_bind", &self.stream_bind),
        ] {
            if !addr.contains(':') {
                return Err(ConfigError::validation(format!(
                    "{name} must be host:port, got {addr:?}"
                )));
            }
        }

        let binds = [&self.control_bind, &self.ingest_bind, &self.stream_bind];
        for (i, a) in binds.iter().enumerate() {
            for b in binds.iter().skip(i + 1) {
                if a == b {
                    return Err(ConfigError::validation(format!(
                        "listener address {a} used more than once"
                    )));
                }
            }
        }

        if self.scheduler.max_chunks == 0 {
            return Err(ConfigError::validation(
                "server.scheduler.max_chunks must be at least 1",
            ));
        }
        if self.scheduler.max_bytes == 0 {
            return Err(ConfigError::validation(
                "server.scheduler.max_bytes must be at least 1",
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::validation(
                "server.max_body_bytes must be at least 1",
            ));
        }
        Ok(())
    }
}
