//! Authorized-sensor registry
//!
//! Holds the mapping from sensor identity to its provisioned token.
//! Supports atomic reload so credential rotation does not require a
//! restart.
//!
//! File format:
//! ```text
//! # comments start with #
//! sensor-eu-1:2f9c1d6a8e4b70d3
//! sensor-us-2:77aa02c4de91b5f0
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use parking_lot::RwLock;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::error::{AuthError, Result};

/// Compare two secrets in constant time
///
/// Length mismatches return false immediately; the underlying comparison
/// for equal-length inputs is constant-time.
pub fn constant_time_eq(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();
    if expected.len() != presented.len() {
        return false;
    }
    expected.ct_eq(presented).into()
}

/// Strip a `Bearer ` prefix from an Authorization header value
pub fn extract_bearer(header: Option<&str>) -> &str {
    match header {
        Some(value) => value.strip_prefix("Bearer ").unwrap_or(value),
        None => "",
    }
}

/// Thread-safe registry of authorized sensors
///
/// Validation is constant-time per entry; lookups are O(1).
#[derive(Debug, Default)]
pub struct SensorRegistry {
    inner: RwLock<HashMap<String, String>>,
}

impl SensorRegistry {
    /// Create an empty registry (all sensors rejected)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the registry from an `id:token` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| AuthError::io_error(path.display().to_string(), e))?;
        let registry = Self::from_str(&contents)?;
        info!(
            path = %path.display(),
            sensors = registry.len(),
            "Loaded sensor registry"
        );
        Ok(registry)
    }

    fn parse(contents: &str) -> Result<Self> {
        let mut entries = HashMap::new();

        for (line_num, line) in contents.lines().enumerate() {
            let line_num = line_num + 1; // 1-based line numbers
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (sensor_id, token) = line
                .split_once(':')
                .ok_or_else(|| AuthError::parse(line_num, "expected sensor_id:token"))?;
            let sensor_id = sensor_id.trim();
            let token = token.trim();

            if sensor_id.is_empty() {
                return Err(AuthError::parse(line_num, "empty sensor id"));
            }
            if token.is_empty() {
                return Err(AuthError::parse(line_num, "empty token"));
            }
            if entries
                .insert(sensor_id.to_string(), token.to_string())
                .is_some()
            {
                return Err(AuthError::parse(
                    line_num,
                    format!("duplicate sensor id {sensor_id}"),
                ));
            }
        }

        Ok(Self {
            inner: RwLock::new(entries),
        })
    }

    /// Validate a sensor's presented token
    pub fn validate(&self, sensor_id: &str, token: &str) -> bool {
        let entries = self.inner.read();
        match entries.get(sensor_id) {
            Some(expected) => constant_time_eq(expected, token),
            None => false,
        }
    }

    /// Add or replace a sensor credential
    pub fn insert(&self, sensor_id: impl Into<String>, token: impl Into<String>) {
        self.inner.write().insert(sensor_id.into(), token.into());
    }

    /// Remove a sensor; subsequent validations fail
    pub fn revoke(&self, sensor_id: &str) -> bool {
        let removed = self.inner.write().remove(sensor_id).is_some();
        if removed {
            warn!(sensor_id, "Revoked sensor credential");
        }
        removed
    }

    /// Atomically replace all entries from new file contents
    pub fn reload(&self, contents: &str) -> Result<usize> {
        let fresh = Self::parse(contents)?;
        let entries = fresh.inner.into_inner();
        let count = entries.len();
        *self.inner.write() = entries;
        info!(sensors = count, "Reloaded sensor registry");
        Ok(count)
    }

    /// Number of authorized sensors
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no sensors are authorized
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl FromStr for SensorRegistry {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Bearer token for read-side consumers
///
/// `None` disables read-side authentication (development setups).
#[derive(Debug, Clone, Default)]
pub struct ReaderToken {
    token: Option<String>,
}

impl ReaderToken {
    /// Require the given token on every read
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Accept all readers
    pub fn disabled() -> Self {
        Self { token: None }
    }

    /// Build from an optional configured token
    pub fn from_option(token: Option<String>) -> Self {
        Self { token }
    }

    /// Validate a presented token
    pub fn validate(&self, presented: &str) -> bool {
        match &self.token {
            Some(expected) => constant_time_eq(expected, presented),
            None => true,
        }
    }
}
