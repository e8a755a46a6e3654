//! Control channel listener
//!
//! Accepts sensor-initiated TCP connections carrying length-prefixed
//! control messages. The first frame must be a `Register`; unknown or
//! revoked identities get an `Error` frame and a fatal close. Registered
//! sessions push heartbeats (which may trigger chunk requests) until the
//! connection drops, the session times out, or a newer registration
//! supersedes it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pylon_auth::SensorRegistry;
use pylon_metrics::ServerMetrics;
use pylon_protocol::{
    read_length_prefix, ControlMessage, Heartbeat, LENGTH_PREFIX_SIZE,
    MAX_CONTROL_MESSAGE_SIZE,
};
use pylon_store::OffsetTracker;

use crate::error::{Result, ServerError};
use crate::scheduler::RequestScheduler;
use crate::session::SessionRegistry;

/// Read buffer size per connection
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A connection must register within this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Control channel listener
pub struct ControlListener {
    bind_addr: String,
    session_timeout: Duration,
    auth: Arc<SensorRegistry>,
    sessions: Arc<SessionRegistry>,
    offsets: Arc<OffsetTracker>,
    scheduler: Arc<RequestScheduler>,
    metrics: Arc<ServerMetrics>,
}

impl ControlListener {
    /// Create a listener
    pub fn new(
        bind_addr: impl Into<String>,
        session_timeout: Duration,
        auth: Arc<SensorRegistry>,
        sessions: Arc<SessionRegistry>,
        offsets: Arc<OffsetTracker>,
        scheduler: Arc<RequestScheduler>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            session_timeout,
            auth,
            sessions,
            offsets,
            scheduler,
            metrics,
        }
    }

    /// Run the accept loop until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener =
            TcpListener::bind(&self.bind_addr)
                .await
                .map_err(|e| ServerError::Bind {
                    address: self.bind_addr.clone(),
                    source: e,
                })?;

        info!(address = %self.bind_addr, "control listener up");
        let this = Arc::new(self);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let this = Arc::clone(&this);
                            let cancel = cancel.clone();
                            tokio::spawn(async move {
                                if let Err(e) = this.handle_connection(stream, peer_addr, cancel).await {
                                    debug!(peer = %peer_addr, error = %e, "control connection ended");
                                }
                            });
                        }
                        Err(e) => {
                            // Transient accept errors - log and continue
                            warn!(error = %e, "accept error");
                        }
                    }
                }
            }
        }

        info!("control listener stopped");
        Ok(())
    }

    /// Handle one connection: handshake, then serve the session
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        server_cancel: CancellationToken,
    ) -> Result<()> {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();
        let mut read_buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        // Handshake: first frame must be Register
        let first = match timeout(
            HANDSHAKE_TIMEOUT,
            read_message(&mut reader, &mut read_buf),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                debug!(peer = %peer_addr, "handshake timeout");
                return Ok(());
            }
        };

        let register = match first {
            ControlMessage::Register(register) => register,
            other => {
                debug!(peer = %peer_addr, ?other, "expected Register");
                send_message(
                    &mut writer,
                    &ControlMessage::Error("expected Register".into()),
                )
                .await?;
                return Ok(());
            }
        };

        if !self.auth.validate(&register.sensor_id, &register.token) {
            warn!(
                peer = %peer_addr,
                sensor_id = %register.sensor_id,
                "rejected unauthorized sensor"
            );
            self.metrics.auth_failure();
            send_message(
                &mut writer,
                &ControlMessage::Error("unauthorized sensor".into()),
            )
            .await?;
            return Ok(());
        }

        let sensor_id = register.sensor_id;
        let committed_sequence = self.offsets.committed(&sensor_id);

        let session_cancel = server_cancel.child_token();
        let (handle, mut outbound) = self.sessions.register(&sensor_id, session_cancel.clone());
        self.metrics.session_opened();

        send_message(
            &mut writer,
            &ControlMessage::Registered { committed_sequence },
        )
        .await?;
        info!(
            sensor_id = %sensor_id,
            peer = %peer_addr,
            software_version = %register.software_version,
            committed_sequence,
            "control session active"
        );

        // There is pending data whenever the sensor's queue outran our
        // committed point; ask for it right away.
        self.scheduler.request_sensor(&sensor_id);

        let result = self
            .session_loop(
                &sensor_id,
                &mut reader,
                &mut writer,
                &mut read_buf,
                &mut outbound,
                &session_cancel,
            )
            .await;

        self.sessions.unregister(&sensor_id, handle.session_id);
        self.metrics.session_closed();
        result
    }

    /// Serve an active session until it drops
    async fn session_loop(
        &self,
        sensor_id: &str,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        read_buf: &mut BytesMut,
        outbound: &mut tokio::sync::mpsc::Receiver<ControlMessage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            // Drain complete frames before waiting on I/O again
            while let Some(message) = try_decode(read_buf)? {
                self.handle_message(sensor_id, message).await?;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(sensor_id, "session cancelled");
                    return Ok(());
                }

                message = outbound.recv() => {
                    match message {
                        Some(message) => send_message(writer, &message).await?,
                        None => return Ok(()),
                    }
                }

                result = timeout(self.session_timeout, reader.read_buf(read_buf)) => {
                    match result {
                        // Missing heartbeats: the sensor is gone, close so
                        // reconnect supersedes cleanly
                        Err(_) => {
                            warn!(sensor_id, "session timed out without heartbeats");
                            return Ok(());
                        }
                        Ok(Ok(0)) => return Ok(()),
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn handle_message(&self, sensor_id: &str, message: ControlMessage) -> Result<()> {
        match message {
            ControlMessage::Heartbeat(heartbeat) => {
                self.metrics.heartbeat_received();
                self.handle_heartbeat(sensor_id, heartbeat);
            }
            other => {
                debug!(sensor_id, ?other, "ignoring unexpected control message");
            }
        }
        Ok(())
    }

    /// A heartbeat reporting pending data triggers an immediate request;
    /// the committed point itself only ever advances from stored chunks
    fn handle_heartbeat(&self, sensor_id: &str, heartbeat: Heartbeat) {
        debug!(
            sensor_id,
            queue_depth = heartbeat.queue_depth,
            sensor_committed = heartbeat.last_committed_sequence,
            "heartbeat"
        );
        if heartbeat.queue_depth > 0 {
            self.scheduler.request_sensor(sensor_id);
        }
    }
}

/// Read one complete frame, filling the buffer as needed
async fn read_message(
    reader: &mut OwnedReadHalf,
    read_buf: &mut BytesMut,
) -> Result<ControlMessage> {
    loop {
        if let Some(message) = try_decode(read_buf)? {
            return Ok(message);
        }
        let read = reader.read_buf(read_buf).await?;
        if read == 0 {
            return Err(ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during read",
            )));
        }
    }
}

/// Decode one complete frame from the buffer, if present
fn try_decode(read_buf: &mut BytesMut) -> Result<Option<ControlMessage>> {
    let Some(msg_len) = read_length_prefix(read_buf) else {
        return Ok(None);
    };

    if msg_len > MAX_CONTROL_MESSAGE_SIZE {
        return Err(
            pylon_protocol::ProtocolError::message_too_large(msg_len, MAX_CONTROL_MESSAGE_SIZE)
                .into(),
        );
    }

    let total = LENGTH_PREFIX_SIZE + msg_len as usize;
    if read_buf.len() < total {
        return Ok(None);
    }

    read_buf.advance(LENGTH_PREFIX_SIZE);
    let frame = read_buf.split_to(msg_len as usize).freeze();
    Ok(Some(ControlMessage::decode(frame)?))
}

/// Write one framed message
async fn send_message(writer: &mut OwnedWriteHalf, message: &ControlMessage) -> Result<()> {
    writer.write_all(&message.encode()).await?;
    Ok(())
}
