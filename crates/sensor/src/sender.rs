//! Data channel sender
//!
//! Pushes chunk batches to the collector's ingest endpoint over HTTP with
//! bounded, jittered retry. Client errors (4xx) are never retried - the
//! batch is malformed or the credential is wrong and retrying cannot fix
//! either. Transport errors and 5xx responses retry up to the attempt cap,
//! after which the window is abandoned and the sensor waits for the next
//! chunk request.

use std::time::Duration;

use tracing::{debug, warn};

use pylon_protocol::{IngestRequest, IngestResponse};

use crate::backoff::ExponentialBackoff;
use crate::error::{Result, SensorError};

/// Sends chunk batches over the data channel
pub struct ChunkSender {
    client: reqwest::Client,
    url: String,
    token: String,
    max_attempts: u32,
}

impl ChunkSender {
    /// Create a sender for the given ingest URL and sensor token
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        send_timeout: Duration,
        max_attempts: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(send_timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
            max_attempts: max_attempts.max(1),
        })
    }

    /// Send one batch, retrying transient failures with backoff
    pub async fn send_batch(&self, request: &IngestRequest) -> Result<IngestResponse> {
        let mut backoff = ExponentialBackoff::default();
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff.next_interval()).await;
            }

            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(e @ SensorError::BatchRejected { .. }) => return Err(e),
                Err(e) => {
                    last_error = e.to_string();
                    debug!(
                        window_id = %request.window_id,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %last_error,
                        "batch send attempt failed"
                    );
                }
            }
        }

        warn!(
            window_id = %request.window_id,
            attempts = self.max_attempts,
            "batch send retries exhausted"
        );
        Err(SensorError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }

    async fn send_once(&self, request: &IngestRequest) -> Result<IngestResponse> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<IngestResponse>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(SensorError::BatchRejected {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(SensorError::ServerUnavailable {
                status: status.as_u16(),
                body,
            })
        }
    }
}
