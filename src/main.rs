//! snowdrift: archives Kafka topic partitions into gzip files on S3.
//!
//! The process runs until a termination signal arrives or any partition
//! worker hits an unrecoverable error, in which case it exits non-zero.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use snowdrift::error::{AddressParseSnafu, ArchiverError, ConfigSnafu, MetricsSnafu};
use snowdrift::{Config, metrics, run_archiver, signal};

/// Kafka to object storage archiver.
#[derive(Parser, Debug)]
#[command(name = "snowdrift")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), ArchiverError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("snowdrift starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Brokers: {}", config.kafka.brokers);
        info!("Destination: {}", config.destination.url);
        for topic in &config.topics {
            info!(
                "  - {}: {} partitions, max object size {} bytes",
                topic.name,
                topic.partitions,
                config.max_object_size_for(&topic.name)
            );
        }
        info!("Workers: {}", config.total_partitions());
        info!("Configuration is valid");
        return Ok(());
    }

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!("Metrics enabled on {}", config.metrics.address);
    }

    let shutdown = CancellationToken::new();
    signal::cancel_on_signal(shutdown.clone());

    run_archiver(config, shutdown).await?;

    info!("snowdrift stopped");
    Ok(())
}
