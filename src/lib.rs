//! snowdrift: archives Kafka topic partitions to object storage.
//!
//! Each assigned partition gets a worker that groups records into
//! time-bucketed, gzip-compressed, newline-delimited chunks and uploads
//! them to S3 or a local directory. Consumer offsets are committed only
//! once every record below the committed offset has been uploaded, so a
//! crash never loses data; it may upload some records twice.
//!
//! # Example
//!
//! ```ignore
//! use snowdrift::{Config, run_archiver};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_file("snowdrift.yaml")?;
//! run_archiver(config, CancellationToken::new()).await?;
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod signal;
pub mod sink;
pub mod source;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use storage::{StorageProvider, StorageProviderRef};
pub use worker::WorkerSupervisor;

use snafu::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use error::{ArchiverError, StorageSnafu};
use source::{KafkaConnector, LogConnector};

/// Archive every configured partition from Kafka until a worker fails or
/// `shutdown` is cancelled.
pub async fn run_archiver(config: Config, shutdown: CancellationToken) -> Result<(), ArchiverError> {
    let connector = KafkaConnector::new(&config.kafka);
    run_with_connector(&config, &connector, shutdown).await
}

/// Archive every configured partition using sessions from `connector`.
pub async fn run_with_connector(
    config: &Config,
    connector: &dyn LogConnector,
    shutdown: CancellationToken,
) -> Result<(), ArchiverError> {
    let storage = StorageProvider::for_url_with_options(
        &config.destination.url,
        config.destination.storage_options.clone(),
    )
    .await
    .context(StorageSnafu)?;
    info!(destination = storage.canonical_url(), "Destination ready");

    let supervisor = WorkerSupervisor::start(config, connector, Arc::new(storage)).await?;
    supervisor.run(shutdown).await
}
