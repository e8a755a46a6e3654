//! Sensor error types

use thiserror::Error;

/// Errors from the sensor agent and its transports
#[derive(Debug, Error)]
pub enum SensorError {
    /// Failed to connect to the collector
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error on the control channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Control channel is not connected
    #[error("control channel not connected")]
    NotConnected,

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// Server rejected the session (fatal until credentials change)
    #[error("session rejected by server: {0}")]
    Rejected(String),

    /// Server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] pylon_protocol::ProtocolError),

    /// Durable queue error
    #[error("queue error: {0}")]
    Queue(#[from] pylon_queue::QueueError),

    /// HTTP transport error on the data channel
    #[error("data channel error: {0}")]
    Http(#[from] reqwest::Error),

    /// Data channel returned a client error; retrying will not help
    #[error("batch rejected with status {status}: {body}")]
    BatchRejected { status: u16, body: String },

    /// Data channel returned a server error; retried with backoff
    #[error("collector unavailable, status {status}: {body}")]
    ServerUnavailable { status: u16, body: String },

    /// All retry attempts exhausted
    #[error("all {attempts} send attempts failed: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl SensorError {
    /// True when the error is transient and the operation should be retried
    /// with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Io(_)
                | Self::Timeout
                | Self::ConnectionClosed
                | Self::Http(_)
                | Self::ServerUnavailable { .. }
        )
    }
}

/// Result type for sensor operations
pub type Result<T> = std::result::Result<T, SensorError>;
