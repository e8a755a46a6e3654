//! `pylon serve` - run the collector

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pylon_auth::{ReaderToken, SensorRegistry};
use pylon_config::ServerFileConfig;
use pylon_metrics::{MetricsProvider, MetricsReporter, ServerMetrics};
use pylon_server::{
    ControlListener, IngestServer, IngestState, RequestScheduler, SessionRegistry,
    SnapshotStreamer,
};
use pylon_store::{ChunkStore, OffsetTracker, SnapshotCache};

/// Arguments for the serve command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to the server configuration file
    #[arg(short, long, default_value = "server.toml")]
    pub config: PathBuf,
}

/// Run the collector until interrupted
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = ServerFileConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    crate::init_logging(&config.log)?;

    let server = config.server;
    info!(
        control = %server.control_bind,
        ingest = %server.ingest_bind,
        stream = %server.stream_bind,
        store = %server.store_path,
        "starting collector"
    );

    // Durable state
    let store = Arc::new(ChunkStore::open(&server.store_path).await?);
    let offsets = Arc::new(OffsetTracker::open(&store).await?);
    let snapshots = Arc::new(SnapshotCache::new());

    // Credentials
    let auth = Arc::new(SensorRegistry::from_file(&server.sensors_file)?);
    if auth.is_empty() {
        warn!("no sensors in registry; all registrations will be rejected");
    }
    let reader = if server.reader_token.is_empty() {
        warn!("no reader token configured; snapshot reads are open");
        ReaderToken::disabled()
    } else {
        ReaderToken::new(server.reader_token.clone())
    };

    // Live components
    let sessions = Arc::new(SessionRegistry::new());
    let metrics = Arc::new(ServerMetrics::new());
    let scheduler = Arc::new(RequestScheduler::new(
        Arc::clone(&sessions),
        Arc::clone(&offsets),
        server.scheduler.clone(),
        Arc::clone(&metrics),
    ));

    let control = ControlListener::new(
        server.control_bind.clone(),
        server.session_timeout,
        Arc::clone(&auth),
        Arc::clone(&sessions),
        Arc::clone(&offsets),
        Arc::clone(&scheduler),
        Arc::clone(&metrics),
    );

    let ingest_state = Arc::new(IngestState::new(
        Arc::clone(&store),
        Arc::clone(&offsets),
        Arc::clone(&snapshots),
        Arc::clone(&sessions),
        Arc::clone(&auth),
        reader.clone(),
        Arc::clone(&metrics),
    ));
    let ingest = IngestServer::new(
        server.ingest_bind.clone(),
        ingest_state,
        server.max_body_bytes,
    );

    let streamer = SnapshotStreamer::new(
        server.stream_bind.clone(),
        Arc::clone(&snapshots),
        reader,
    );

    // Spawn everything under one cancellation token
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = control.run(cancel).await {
                error!(error = %e, "control listener failed");
            }
        }));
    }
    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = ingest.run(cancel).await {
                error!(error = %e, "ingest endpoint failed");
            }
        }));
    }
    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = streamer.run(cancel).await {
                error!(error = %e, "snapshot stream failed");
            }
        }));
    }
    if config.metrics.enabled {
        let mut reporter = MetricsReporter::new(config.metrics.interval);
        reporter.register(Arc::clone(&metrics) as Arc<dyn MetricsProvider>);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(reporter.run(cancel)));
    }

    // Retention housekeeping
    {
        let cancel = cancel.clone();
        let store = Arc::clone(&store);
        let retention = server.retention;
        let prune_interval = server.prune_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(prune_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = store.prune_completed(retention).await {
                            warn!(error = %e, "retention pruning failed");
                        }
                    }
                }
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down collector");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
