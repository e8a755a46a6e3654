//! Control session registry
//!
//! The server maintains at most one live session per sensor identity. A
//! newer connection for the same identity supersedes the prior one: the old
//! session's task is cancelled so the same sensor can never hold two
//! concurrent windows.
//!
//! Sessions are inserted on a successful `Register` and removed when the
//! connection task ends; removal is guarded by the session id so a
//! superseded task cannot evict its replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pylon_protocol::ControlMessage;

/// Outbound queue depth per session
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Handle to one live control session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Unique id of this session instance
    pub session_id: u64,
    tx: mpsc::Sender<ControlMessage>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Cancel the session's connection task
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Enqueue a message for the session's writer (non-blocking)
    fn try_send(&self, message: ControlMessage) -> bool {
        self.tx.try_send(message).is_ok()
    }
}

/// Registry of live control sessions, keyed by sensor id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    next_session_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for a sensor
    ///
    /// Returns the outbound receiver for the connection's writer plus the
    /// session's handle. Any prior session for the same identity is
    /// cancelled (superseded).
    pub fn register(
        &self,
        sensor_id: &str,
        cancel: CancellationToken,
    ) -> (SessionHandle, mpsc::Receiver<ControlMessage>) {
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let handle = SessionHandle {
            session_id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            tx,
            cancel,
        };

        let superseded = self
            .sessions
            .lock()
            .insert(sensor_id.to_string(), handle.clone());

        if let Some(old) = superseded {
            info!(
                sensor_id,
                old_session = old.session_id,
                new_session = handle.session_id,
                "superseding prior control session"
            );
            old.close();
        } else {
            info!(sensor_id, session = handle.session_id, "sensor connected");
        }

        (handle, rx)
    }

    /// Remove a session when its connection task ends
    ///
    /// Only removes the entry when it still belongs to `session_id`, so a
    /// superseded task cannot evict its replacement.
    pub fn unregister(&self, sensor_id: &str, session_id: u64) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(sensor_id) {
            Some(current) if current.session_id == session_id => {
                sessions.remove(sensor_id);
                info!(sensor_id, session = session_id, "sensor disconnected");
                true
            }
            _ => false,
        }
    }

    /// Push a message to a sensor's session (non-blocking)
    ///
    /// Returns false when the sensor has no live session or its outbound
    /// queue is full; callers treat both as "not connected right now".
    pub fn send(&self, sensor_id: &str, message: ControlMessage) -> bool {
        let handle = {
            let sessions = self.sessions.lock();
            sessions.get(sensor_id).cloned()
        };

        match handle {
            Some(handle) => {
                let sent = handle.try_send(message);
                if !sent {
                    warn!(sensor_id, "session outbound queue full, dropping message");
                }
                sent
            }
            None => {
                debug!(sensor_id, "no live session");
                false
            }
        }
    }

    /// True when the sensor has a live session
    pub fn is_active(&self, sensor_id: &str) -> bool {
        self.sessions.lock().contains_key(sensor_id)
    }

    /// Sensors with live sessions
    pub fn active_sensors(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True when no sensor is connected
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
