//! `pylon sensor` - run the sensor agent

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pylon_config::SensorFileConfig;
use pylon_metrics::{MetricsProvider, MetricsReporter, SensorMetrics};
use pylon_queue::DurableQueue;
use pylon_sensor::SensorAgent;

/// Arguments for the sensor command
#[derive(Args, Debug)]
pub struct SensorArgs {
    /// Path to the sensor configuration file
    #[arg(short, long, default_value = "sensor.toml")]
    pub config: PathBuf,
}

/// Run the sensor agent until interrupted
pub async fn run(args: SensorArgs) -> Result<()> {
    let config = SensorFileConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    crate::init_logging(&config.log)?;

    let sensor = config.sensor;
    info!(
        sensor_id = %sensor.id,
        queue = %sensor.queue_path,
        control = %sensor.control_addr,
        "starting sensor agent"
    );

    let queue = Arc::new(
        DurableQueue::open(&sensor.queue_path)
            .await?
            .with_retention(sensor.retention),
    );
    let metrics = Arc::new(SensorMetrics::new());
    let agent = SensorAgent::new(sensor.clone(), Arc::clone(&queue), Arc::clone(&metrics))?;

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = agent.run(cancel).await {
                error!(error = %e, "sensor agent failed");
            }
        }));
    }

    if config.metrics.enabled {
        let mut reporter = MetricsReporter::new(config.metrics.interval);
        reporter.register(Arc::clone(&metrics) as Arc<dyn MetricsProvider>);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(reporter.run(cancel)));
    }

    // Retention expiry also runs while idle, not just on enqueue
    {
        let cancel = cancel.clone();
        let queue = Arc::clone(&queue);
        let retention = sensor.retention;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.expire_older_than(retention).await {
                            warn!(error = %e, "queue retention expiry failed");
                        }
                    }
                }
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down sensor agent");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
