//! `pylon enqueue` - feed a payload into the local durable queue
//!
//! The operational surface measurement exporters use to hand results to the
//! pipeline: reads a payload from a file (or stdin), chunks it with the
//! configured size and codec, and appends it to the queue. The running
//! agent delivers it on the collector's next request.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use pylon_config::SensorFileConfig;
use pylon_protocol::{random_event_id, split, Compression};
use pylon_queue::DurableQueue;

/// Arguments for the enqueue command
#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Path to the sensor configuration file
    #[arg(short, long, default_value = "sensor.toml")]
    pub config: PathBuf,

    /// Event identifier (random when omitted)
    #[arg(long)]
    pub event_id: Option<String>,

    /// Payload file; "-" or omitted reads stdin
    pub input: Option<PathBuf>,
}

/// Chunk one payload into the queue
pub async fn run(args: EnqueueArgs) -> Result<()> {
    let config = SensorFileConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let sensor = config.sensor;

    let payload = read_payload(args.input.as_deref())?;
    let event_id = args.event_id.unwrap_or_else(random_event_id);
    let compression = Compression::parse(&sensor.compression)?;

    let chunks = split(&payload, &event_id, sensor.chunk_bytes, compression)?;
    let chunk_count = chunks.len();

    let queue = DurableQueue::open(&sensor.queue_path)
        .await?
        .with_retention(sensor.retention);
    let sequences = queue.enqueue(&chunks).await?;
    let depth = queue.queue_depth().await?;

    println!(
        "enqueued event {} ({} bytes, {} chunk{}) as sequence{} {}..{}; queue depth {}",
        event_id,
        payload.len(),
        chunk_count,
        if chunk_count == 1 { "" } else { "s" },
        if sequences.len() == 1 { "" } else { "s" },
        sequences.first().copied().unwrap_or(0),
        sequences.last().copied().unwrap_or(0),
        depth,
    );
    Ok(())
}

fn read_payload(input: Option<&std::path::Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))
        }
        _ => {
            let mut payload = Vec::new();
            std::io::stdin()
                .read_to_end(&mut payload)
                .context("reading stdin")?;
            Ok(payload)
        }
    }
}
