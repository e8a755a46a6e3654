//! Sensor agent - the run loop tying queue, control channel, and sender
//!
//! The agent maintains the control session (reconnecting forever with
//! jittered backoff), answers server chunk requests by sending batches over
//! the data channel, applies acknowledgments to the queue, and pushes
//! heartbeats so the collector knows when there is pending data.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pylon_config::SensorConfig;
use pylon_metrics::SensorMetrics;
use pylon_protocol::{ChunkRequest, ControlMessage, Heartbeat, IngestRequest, Register};
use pylon_queue::DurableQueue;

use crate::backoff::ExponentialBackoff;
use crate::control::ControlClient;
use crate::dispatch::ChunkDispatcher;
use crate::error::{Result, SensorError};
use crate::sender::ChunkSender;

/// The sensor-side pipeline agent
pub struct SensorAgent {
    config: SensorConfig,
    queue: Arc<DurableQueue>,
    dispatcher: ChunkDispatcher,
    control: ControlClient,
    sender: ChunkSender,
    metrics: Arc<SensorMetrics>,
}

impl SensorAgent {
    /// Wire up an agent from its configuration and an opened queue
    pub fn new(
        config: SensorConfig,
        queue: Arc<DurableQueue>,
        metrics: Arc<SensorMetrics>,
    ) -> Result<Self> {
        let register = Register {
            sensor_id: config.id.clone(),
            token: config.token.clone(),
            software_version: config.software_version.clone(),
            capabilities: vec!["chunks".into(), "heartbeats".into()],
        };

        let control = ControlClient::new(config.control_addr.clone(), register);
        let sender = ChunkSender::new(
            config.ingest_url.clone(),
            config.token.clone(),
            config.send_timeout,
            config.max_send_attempts,
        )?;
        let dispatcher = ChunkDispatcher::new(config.id.clone(), Arc::clone(&queue));

        Ok(Self {
            config,
            queue,
            dispatcher,
            control,
            sender,
            metrics,
        })
    }

    /// Run until cancelled
    ///
    /// Connection failures are never fatal: the agent sleeps on the backoff
    /// schedule and tries again, indefinitely.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            sensor_id = %self.config.id,
            control_addr = %self.config.control_addr,
            "sensor agent starting"
        );

        let mut reconnect = ExponentialBackoff::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.control.connect().await {
                Ok(committed_sequence) => {
                    reconnect.reset();
                    // The server's committed point acknowledges everything
                    // we may have missed while disconnected.
                    let stats = self.dispatcher.handle_ack(committed_sequence).await?;
                    self.metrics.set_queue_depth(stats.remaining);

                    self.session_loop(&cancel).await;
                }
                Err(SensorError::Rejected(reason)) => {
                    // Fatal until the registry changes; keep the slow retry
                    // so a rotated credential file picks the sensor back up.
                    warn!(reason = %reason, "registration rejected");
                }
                Err(e) => {
                    debug!(error = %e, "control connection failed");
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            self.metrics.reconnect();
            let delay = reconnect.next_interval();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.control.close().await;
        info!(sensor_id = %self.config.id, "sensor agent stopped");
        Ok(())
    }

    /// Serve one registered session until it drops or we are cancelled
    async fn session_loop(&mut self, cancel: &CancellationToken) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,

                _ = heartbeat.tick() => {
                    self.dispatcher.expire_windows(self.config.window_timeout);
                    if let Err(e) = self.send_heartbeat().await {
                        debug!(error = %e, "heartbeat failed, reconnecting");
                        return;
                    }
                }

                message = self.control.recv() => {
                    match message {
                        Ok(message) => {
                            if let Err(e) = self.handle_control(message).await {
                                warn!(error = %e, "failed to handle control message");
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "control channel dropped");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_control(&mut self, message: ControlMessage) -> Result<()> {
        match message {
            ControlMessage::ChunkRequest(request) => self.handle_chunk_request(request).await,
            ControlMessage::ChunkAck(ack) => {
                let stats = self.dispatcher.handle_ack(ack.committed_upto_sequence).await?;
                self.metrics.ack_received();
                self.metrics.set_queue_depth(stats.remaining);
                debug!(
                    window_id = %ack.window_id,
                    committed = ack.committed_upto_sequence,
                    deleted = stats.deleted,
                    remaining = stats.remaining,
                    "ack applied"
                );
                Ok(())
            }
            ControlMessage::Error(reason) => {
                warn!(reason = %reason, "server reported session error");
                Ok(())
            }
            other => {
                debug!(?other, "ignoring unexpected control message");
                Ok(())
            }
        }
    }

    /// Answer a chunk request: build the window's batch, send it, reconcile
    /// from the response
    async fn handle_chunk_request(&mut self, request: ChunkRequest) -> Result<()> {
        let chunks = self.dispatcher.build_batch(&request).await?;
        if chunks.is_empty() {
            debug!(
                window_id = %request.window_id,
                since = request.since_sequence,
                "no chunks for request"
            );
            return Ok(());
        }

        self.metrics.window_opened();
        let chunk_count = chunks.len() as u64;
        let byte_count: u64 = chunks.iter().map(|c| c.payload.len() as u64).sum();

        let batch = IngestRequest {
            sensor_id: self.config.id.clone(),
            window_id: request.window_id.clone(),
            chunks,
        };

        match self.sender.send_batch(&batch).await {
            Ok(response) => {
                self.metrics.batch_sent(chunk_count, byte_count);
                // The response's committed sequence reconciles immediately,
                // even when the control-channel ack is delayed or lost.
                let stats = self
                    .dispatcher
                    .handle_ack(response.committed_sequence)
                    .await?;
                self.metrics.set_queue_depth(stats.remaining);

                if !response.errors.is_empty() {
                    warn!(
                        window_id = %request.window_id,
                        errors = response.errors.len(),
                        first_reason = %response.errors[0].reason,
                        "collector rejected chunks in batch"
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.metrics.send_failure();
                self.metrics.window_abandoned();
                self.dispatcher.abandon_window(&request.window_id);
                Err(e)
            }
        }
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let queue_depth = self.queue.queue_depth().await?;
        self.metrics.set_queue_depth(queue_depth);

        let heartbeat = Heartbeat {
            last_committed_sequence: self.dispatcher.last_ack_sequence(),
            queue_depth,
        };
        self.control
            .send(&ControlMessage::Heartbeat(heartbeat))
            .await?;
        self.metrics.heartbeat_sent();
        Ok(())
    }
}
