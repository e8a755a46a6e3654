//! Snapshot stream server
//!
//! Pushes snapshot updates to read-side consumers (dashboards) over a TCP
//! connection carrying length-prefixed JSON messages.
//!
//! # Protocol
//!
//! Client → Server (first frame): `{"type": "subscribe", "token": "..."}`
//!
//! Server → Client:
//! - `{"type": "snapshot_batch", "snapshots": [...]}` - current state on
//!   subscribe
//! - `{"type": "snapshot", "snapshot": {...}}` - on every publish
//! - `{"type": "heartbeat"}` - keep-alive (every 30s)
//! - `{"type": "error", "message": "..."}` - before a fatal close

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pylon_auth::ReaderToken;
use pylon_protocol::{read_length_prefix, LENGTH_PREFIX_SIZE, MAX_CONTROL_MESSAGE_SIZE};
use pylon_store::{Snapshot, SnapshotCache};

use crate::error::{Result, ServerError};

/// Keep-alive interval
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A subscribe frame must arrive within this window
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Subscribe request from a consumer
#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    token: String,
}

/// Messages pushed to consumers
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage<'a> {
    Snapshot { snapshot: &'a Snapshot },
    SnapshotBatch { snapshots: Vec<Snapshot> },
    Heartbeat,
    Error { message: &'a str },
}

/// Broadcasts snapshot publishes to subscribed consumers
pub struct SnapshotStreamer {
    bind_addr: String,
    cache: Arc<SnapshotCache>,
    reader: ReaderToken,
}

impl SnapshotStreamer {
    /// Create a streamer over the snapshot cache
    pub fn new(bind_addr: impl Into<String>, cache: Arc<SnapshotCache>, reader: ReaderToken) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            cache,
            reader,
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

        info!(address = %self.bind_addr, "snapshot stream up");
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
                                if let Err(e) = this.handle_client(stream, peer_addr, cancel).await {
                                    debug!(peer = %peer_addr, error = %e, "stream client ended");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept error");
                        }
                    }
                }
            }
        }

        info!("snapshot stream stopped");
        Ok(())
    }

    async fn handle_client(
        &self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        // Read and validate the subscribe frame
        let request = match timeout(SUBSCRIBE_TIMEOUT, read_subscribe(&mut stream)).await {
            Ok(request) => request?,
            Err(_) => {
                debug!(peer = %peer_addr, "subscribe timeout");
                return Ok(());
            }
        };

        if request.kind != "subscribe" {
            write_message(&mut stream, &StreamMessage::Error {
                message: "expected subscribe",
            })
            .await?;
            return Ok(());
        }
        if !self.reader.validate(&request.token) {
            warn!(peer = %peer_addr, "rejected stream consumer");
            write_message(&mut stream, &StreamMessage::Error {
                message: "unauthorized",
            })
            .await?;
            return Ok(());
        }

        // Subscribe before snapshotting so no publish can fall between
        let mut feed = self.cache.subscribe();
        write_message(&mut stream, &StreamMessage::SnapshotBatch {
            snapshots: self.cache.all(),
        })
        .await?;
        info!(peer = %peer_addr, "stream consumer subscribed");

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // arm without firing immediately

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),

                result = feed.recv() => {
                    match result {
                        Ok(snapshot) => {
                            write_message(&mut stream, &StreamMessage::Snapshot {
                                snapshot: &snapshot,
                            })
                            .await?;
                        }
                        // Slow consumer fell behind the broadcast buffer;
                        // resync with a full batch rather than dropping it
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(peer = %peer_addr, missed, "consumer lagged, resyncing");
                            write_message(&mut stream, &StreamMessage::SnapshotBatch {
                                snapshots: self.cache.all(),
                            })
                            .await?;
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }

                _ = heartbeat.tick() => {
                    write_message(&mut stream, &StreamMessage::Heartbeat).await?;
                }
            }
        }
    }
}

/// Read the length-prefixed subscribe frame
async fn read_subscribe(stream: &mut TcpStream) -> Result<SubscribeRequest> {
    let mut buf = BytesMut::with_capacity(4 * 1024);
    loop {
        if let Some(msg_len) = read_length_prefix(&buf) {
            if msg_len > MAX_CONTROL_MESSAGE_SIZE {
                return Err(pylon_protocol::ProtocolError::message_too_large(
                    msg_len,
                    MAX_CONTROL_MESSAGE_SIZE,
                )
                .into());
            }
            let total = LENGTH_PREFIX_SIZE + msg_len as usize;
            if buf.len() >= total {
                buf.advance(LENGTH_PREFIX_SIZE);
                let frame = buf.split_to(msg_len as usize);
                return Ok(serde_json::from_slice(&frame)?);
            }
        }

        let read = stream.read_buf(&mut buf).await?;
        if read == 0 {
            return Err(ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before subscribe",
            )));
        }
    }
}

/// Write one length-prefixed JSON message
async fn write_message(stream: &mut TcpStream, message: &StreamMessage<'_>) -> Result<()> {
    let body = serde_json::to_vec(message)?;
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    Ok(())
}
