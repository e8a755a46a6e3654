//! Control channel client
//!
//! The sensor initiates a long-lived TCP connection to the collector
//! (sensor-initiated, to work through NAT and firewalls) carrying
//! length-prefixed control messages. The handshake sends `Register` and
//! expects `Registered` (with the server's committed sequence) or a fatal
//! `Error`.
//!
//! Reconnection policy lives in the agent; this client is one connection
//! attempt at a time: `Disconnected → Connecting → Registered → Active`,
//! back to `Disconnected` on any error.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use pylon_protocol::{
    read_length_prefix, ControlMessage, ProtocolError, Register, LENGTH_PREFIX_SIZE,
    MAX_CONTROL_MESSAGE_SIZE,
};

use crate::error::{Result, SensorError};

/// Read buffer size per connection
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Handshake must complete within this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP keepalive idle time before probes start
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Client side of the control channel
pub struct ControlClient {
    addr: String,
    register: Register,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
}

impl ControlClient {
    /// Create a client targeting the collector's control address
    pub fn new(addr: impl Into<String>, register: Register) -> Self {
        Self {
            addr: addr.into(),
            register,
            stream: None,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// True when a registered session is up
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connect and register; returns the server's committed sequence
    ///
    /// A server `Error` reply means the credential was rejected - the
    /// session is fatal until the registry changes, though the agent may
    /// keep retrying on its backoff schedule.
    pub async fn connect(&mut self) -> Result<u64> {
        self.close().await;

        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SensorError::Connect {
                    addr: self.addr.clone(),
                    source: e,
                });
            }
            Err(_) => return Err(SensorError::Timeout),
        };

        configure_socket(&stream);
        self.stream = Some(stream);
        self.read_buf.clear();

        // Handshake: Register, then wait for the verdict
        self.send(&ControlMessage::Register(self.register.clone()))
            .await?;

        let reply = match timeout(HANDSHAKE_TIMEOUT, self.recv()).await {
            Ok(reply) => reply?,
            Err(_) => {
                self.close().await;
                return Err(SensorError::Timeout);
            }
        };

        match reply {
            ControlMessage::Registered { committed_sequence } => {
                debug!(
                    addr = %self.addr,
                    committed_sequence,
                    "control session registered"
                );
                Ok(committed_sequence)
            }
            ControlMessage::Error(reason) => {
                self.close().await;
                Err(SensorError::Rejected(reason))
            }
            other => {
                self.close().await;
                Err(ProtocolError::UnknownMessageType(message_tag(&other)).into())
            }
        }
    }

    /// Receive the next control message
    pub async fn recv(&mut self) -> Result<ControlMessage> {
        loop {
            if let Some(message) = self.try_decode()? {
                trace!(?message, "control message received");
                return Ok(message);
            }

            let stream = self.stream.as_mut().ok_or(SensorError::NotConnected)?;
            let read = stream.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                self.close().await;
                return Err(SensorError::ConnectionClosed);
            }
        }
    }

    /// Send a control message
    pub async fn send(&mut self, message: &ControlMessage) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(SensorError::NotConnected)?;
        let encoded = message.encode();
        if let Err(e) = stream.write_all(&encoded).await {
            self.close().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop the connection, if any
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.read_buf.clear();
    }

    /// Decode one complete frame from the buffer, if present
    fn try_decode(&mut self) -> Result<Option<ControlMessage>> {
        let Some(msg_len) = read_length_prefix(&self.read_buf) else {
            return Ok(None);
        };

        if msg_len > MAX_CONTROL_MESSAGE_SIZE {
            return Err(
                ProtocolError::message_too_large(msg_len, MAX_CONTROL_MESSAGE_SIZE).into(),
            );
        }

        let total = LENGTH_PREFIX_SIZE + msg_len as usize;
        if self.read_buf.len() < total {
            return Ok(None);
        }

        self.read_buf.advance(LENGTH_PREFIX_SIZE);
        let frame = self.read_buf.split_to(msg_len as usize).freeze();
        Ok(Some(ControlMessage::decode(frame)?))
    }
}

/// Enable TCP keepalive so half-open connections are detected (non-fatal
/// when the platform refuses)
fn configure_socket(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY");
    }

    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);

    #[cfg(target_os = "linux")]
    let keepalive = keepalive.with_interval(Duration::from_secs(10));

    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        debug!(error = %e, "failed to set TCP keepalive");
    }
}

/// Wire tag of an unexpected message, for error reporting
fn message_tag(message: &ControlMessage) -> u8 {
    match message {
        ControlMessage::Register(_) => 0x01,
        ControlMessage::Registered { .. } => 0x02,
        ControlMessage::Heartbeat(_) => 0x03,
        ControlMessage::ChunkRequest(_) => 0x04,
        ControlMessage::ChunkAck(_) => 0x05,
        ControlMessage::Error(_) => 0x06,
    }
}
