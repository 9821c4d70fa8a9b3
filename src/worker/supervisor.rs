//! Starts one worker per configured partition and watches them.

use futures::future::try_join_all;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{PartitionWorker, RetryPolicy, WorkerHandle, WorkerState, connect_with_retry};
use crate::config::Config;
use crate::error::{ArchiverError, SpoolDirSnafu, TaskJoinSnafu, WorkerError, WorkerSnafu};
use crate::partition::KeyExtractor;
use crate::sink::{ChunkSettings, ChunkUploader, MultiplexingSink, ObjectKeyNaming};
use crate::source::LogConnector;
use crate::storage::StorageProviderRef;

/// Owns the worker pool for the lifetime of the process.
pub struct WorkerSupervisor {
    workers: Vec<PartitionWorker>,
    handles: Vec<WorkerHandle>,
    stats_interval: Duration,
}

impl WorkerSupervisor {
    /// Connect a session for every configured partition.
    ///
    /// Sessions are opened concurrently, each with its own retry budget.
    /// If any partition exhausts its retries, no worker is started.
    pub async fn start(
        config: &Config,
        connector: &dyn LogConnector,
        storage: StorageProviderRef,
    ) -> Result<Self, ArchiverError> {
        let spool_dir = config.spool_dir();
        tokio::fs::create_dir_all(&spool_dir)
            .await
            .context(SpoolDirSnafu { path: &spool_dir })?;

        let naming = ObjectKeyNaming::new(
            config.destination.topic_prefix.clone(),
            config.destination.time_bucket_format.clone(),
        );
        let extractor = KeyExtractor::new(&config.partitioning);
        let settings = ChunkSettings {
            spool_dir,
            lease: config.sink.lease(),
            stale_after: config.sink.stale_after,
        };
        let retry = RetryPolicy {
            attempts: config.kafka.connect_retries,
            delay: config.kafka.connect_retry_delay(),
        };

        let assignments = config
            .topics
            .iter()
            .flat_map(|topic| (0..topic.partitions).map(move |partition| (topic, partition)));

        let pending = assignments.map(|(topic, partition)| {
            let naming = naming.clone();
            let extractor = extractor.clone();
            let settings = settings.clone();
            let storage = Arc::clone(&storage);
            async move {
                let state = Arc::new(WorkerState::default());
                let handle = WorkerHandle::new(&topic.name, partition, Arc::clone(&state));
                let session = connect_with_retry(connector, &topic.name, partition, retry).await?;

                let uploader = Arc::new(ChunkUploader::new(storage, naming, &topic.name, partition));
                let sink = MultiplexingSink::new(
                    extractor,
                    config.partitioning.on_malformed,
                    uploader,
                    settings,
                    config.max_object_size_for(&topic.name),
                );
                let worker = PartitionWorker::new(
                    &topic.name,
                    partition,
                    session,
                    sink,
                    config.kafka.poll_timeout(),
                    state,
                );
                Ok::<_, WorkerError>((worker, handle))
            }
        });

        let started = try_join_all(pending).await.context(WorkerSnafu)?;
        let (workers, handles): (Vec<_>, Vec<_>) = started.into_iter().unzip();
        info!(
            workers = config.total_partitions(),
            destination = %config.destination.url,
            "All partition sessions established"
        );

        Ok(Self {
            workers,
            handles,
            stats_interval: config.stats_interval(),
        })
    }

    /// Run every worker until one fails or `shutdown` is cancelled.
    ///
    /// The first worker failure aborts the others and is returned. On
    /// shutdown, workers are aborted without uploading buffered chunks;
    /// their records were never committed and will be consumed again.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ArchiverError> {
        let Self {
            workers,
            handles,
            stats_interval,
        } = self;

        let mut tasks = JoinSet::new();
        for worker in workers {
            tasks.spawn(worker.run());
        }

        let mut stats = tokio::time::interval(stats_interval);
        stats.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping partition workers");
                    tasks.shutdown().await;
                    report_stats(&handles);
                    return Ok(());
                }
                _ = stats.tick() => report_stats(&handles),
                Some(joined) = tasks.join_next() => {
                    let failure = match joined {
                        Ok(Ok(never)) => match never {},
                        Ok(Err(failure)) => failure,
                        Err(join_error) => {
                            tasks.shutdown().await;
                            return Err(join_error).context(TaskJoinSnafu);
                        }
                    };
                    error!("Stopping all partition workers after a fatal error");
                    tasks.shutdown().await;
                    report_stats(&handles);
                    return Err(failure).context(WorkerSnafu);
                }
            }
        }
    }
}

fn report_stats(handles: &[WorkerHandle]) {
    for handle in handles {
        info!("{handle}");
    }
}
