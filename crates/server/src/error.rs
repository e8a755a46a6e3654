//! Server error types

use thiserror::Error;

/// Errors from the collector services
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind a listener
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error on a connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error on the control channel
    #[error("protocol error: {0}")]
    Protocol(#[from] pylon_protocol::ProtocolError),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] pylon_store::StoreError),

    /// Credential registry error
    #[error("auth error: {0}")]
    Auth(#[from] pylon_auth::AuthError),

    /// JSON encoding error on the stream feed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP server error
    #[error("http server error: {0}")]
    Http(String),
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
