//! Pylon Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! Minimal config should just work - only specify what you need to change.
//!
//! Two top-level shapes, one per role:
//!
//! ```toml
//! # sensor.toml
//! [sensor]
//! id = "sensor-eu-1"
//! token = "2f9c1d6a8e4b70d3"
//! ```
//!
//! ```toml
//! # server.toml
//! [server]
//! sensors_file = "sensors.conf"
//! ```

mod error;
mod logging;
mod sensor;
mod server;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use sensor::SensorConfig;
pub use server::{SchedulerConfig, ServerConfig};

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable periodic metrics logging
    /// Default: true
    pub enabled: bool,

    /// Reporting interval
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub interval: std::time::Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: std::time::Duration::from_secs(60),
        }
    }
}

/// Top-level configuration for the sensor role
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensorFileConfig {
    /// Sensor agent settings
    pub sensor: SensorConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Metrics reporting configuration
    pub metrics: MetricsConfig,
}

impl SensorFileConfig {
    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_str(&read_file(path)?)
    }
}

impl FromStr for SensorFileConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.sensor.validate()?;
        Ok(config)
    }
}

/// Top-level configuration for the collector role
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerFileConfig {
    /// Collector settings
    pub server: ServerConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Metrics reporting configuration
    pub metrics: MetricsConfig,
}

impl ServerFileConfig {
    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_str(&read_file(path)?)
    }
}

impl FromStr for ServerFileConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.server.validate()?;
        Ok(config)
    }
}

fn read_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.display().to_string(),
        source: e,
    })
}
