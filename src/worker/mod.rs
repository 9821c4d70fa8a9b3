//! Partition workers.
//!
//! One worker runs per (topic, partition). It polls the log session,
//! routes records through its [`MultiplexingSink`], checks leases, and
//! commits the offset watermark only after uploads complete. Any error is
//! fatal to the worker and, through the supervisor, to the process.

mod state;
mod supervisor;

pub use state::{WorkerHandle, WorkerPhase, WorkerSnapshot, WorkerState};
pub use supervisor::WorkerSupervisor;

use snafu::prelude::*;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::emit;
use crate::error::{ConnectExhaustedSnafu, WorkerError, WorkerSinkSnafu, WorkerSourceSnafu};
use crate::metrics::events::{ConnectRetry, OffsetCommitted, RecordConsumed, WorkerFailed};
use crate::sink::MultiplexingSink;
use crate::source::{LogConnector, LogRecord, LogSession};

/// How often and how patiently to retry opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

/// Open a session, retrying with a fixed delay.
///
/// Returns [`WorkerError::ConnectExhausted`] once every attempt has failed.
pub async fn connect_with_retry(
    connector: &dyn LogConnector,
    topic: &str,
    partition: i32,
    policy: RetryPolicy,
) -> Result<Box<dyn LogSession>, WorkerError> {
    let mut attempt = 1;
    loop {
        match connector.connect(topic, partition).await {
            Ok(session) => return Ok(session),
            Err(error) if attempt < policy.attempts => {
                warn!(
                    topic,
                    partition,
                    attempt,
                    max_attempts = policy.attempts,
                    %error,
                    "Failed to open log session, retrying"
                );
                emit!(ConnectRetry {
                    topic,
                    partition,
                    attempt,
                });
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(source).context(ConnectExhaustedSnafu {
                    topic,
                    partition,
                    attempts: attempt,
                });
            }
        }
    }
}

/// Archives one log partition.
pub struct PartitionWorker {
    topic: String,
    partition: i32,
    session: Box<dyn LogSession>,
    sink: MultiplexingSink,
    state: Arc<WorkerState>,
    poll_timeout: Duration,
    last_committed: Option<i64>,
}

impl PartitionWorker {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        session: Box<dyn LogSession>,
        sink: MultiplexingSink,
        poll_timeout: Duration,
        state: Arc<WorkerState>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            session,
            sink,
            state,
            poll_timeout,
            last_committed: None,
        }
    }

    /// Consume until a fatal error. Unuploaded chunks are discarded before
    /// the error is returned; their records stay uncommitted.
    pub async fn run(mut self) -> Result<Infallible, WorkerError> {
        self.state.set_phase(WorkerPhase::Consuming);
        info!(topic = %self.topic, partition = self.partition, "Partition worker consuming");

        loop {
            if let Err(error) = self.step().await {
                self.state.set_phase(WorkerPhase::Draining);
                let snapshot = self.state.snapshot();
                error!(
                    topic = %self.topic,
                    partition = self.partition,
                    messages = snapshot.messages,
                    bytes = snapshot.bytes,
                    uploads = snapshot.uploads,
                    "Partition worker failed: {}",
                    snafu::Report::from_error(&error)
                );
                self.sink.close_all();
                emit!(WorkerFailed {
                    topic: &self.topic,
                    partition: self.partition,
                });
                self.state.set_phase(WorkerPhase::Terminated);
                return Err(error);
            }
        }
    }

    /// One iteration: poll, append, check leases, commit if uploads landed.
    pub async fn step(&mut self) -> Result<(), WorkerError> {
        let record = self.poll().await?;
        self.handle(record, Instant::now()).await
    }

    /// Like [`step`](Self::step), with `now` standing in for the clock.
    pub async fn step_at(&mut self, now: Instant) -> Result<(), WorkerError> {
        let record = self.poll().await?;
        self.handle(record, now).await
    }

    async fn poll(&mut self) -> Result<Option<LogRecord>, WorkerError> {
        self.session
            .poll(self.poll_timeout)
            .await
            .context(WorkerSourceSnafu {
                topic: &self.topic,
                partition: self.partition,
            })
    }

    async fn handle(&mut self, record: Option<LogRecord>, now: Instant) -> Result<(), WorkerError> {
        if let Some(record) = record {
            let bytes = self
                .sink
                .append(&record, now)
                .await
                .context(WorkerSinkSnafu {
                    topic: &self.topic,
                    partition: self.partition,
                })? as u64;
            self.state.record_message(bytes);
            emit!(RecordConsumed {
                topic: &self.topic,
                partition: self.partition,
                bytes,
            });
        }

        self.sink
            .check_file_lease(now)
            .await
            .context(WorkerSinkSnafu {
                topic: &self.topic,
                partition: self.partition,
            })?;

        let completed = self.sink.take_completed();
        if completed.is_empty() {
            return Ok(());
        }
        self.state.set_uploads(self.sink.uploads());
        self.commit_progress(completed.len()).await
    }

    async fn commit_progress(&mut self, uploaded: usize) -> Result<(), WorkerError> {
        let Some(offset) = self.sink.committable_offset() else {
            return Ok(());
        };
        if self.last_committed.is_some_and(|committed| offset <= committed) {
            debug!(
                topic = %self.topic,
                partition = self.partition,
                offset,
                "Watermark unchanged, skipping commit"
            );
            return Ok(());
        }

        self.session
            .commit(offset)
            .await
            .context(WorkerSourceSnafu {
                topic: &self.topic,
                partition: self.partition,
            })?;
        self.last_committed = Some(offset);
        self.state.set_committed(offset);
        emit!(OffsetCommitted {
            topic: &self.topic,
            partition: self.partition,
            offset,
        });
        info!(
            topic = %self.topic,
            partition = self.partition,
            offset,
            uploaded,
            "Committed offsets"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitioningConfig;
    use crate::error::SourceError;
    use crate::partition::{KeyExtractor, MalformedRecordPolicy, TimeBucketFormat};
    use crate::sink::{ChunkSettings, ChunkUploader, ObjectKeyNaming};
    use crate::storage::StorageProvider;
    use async_trait::async_trait;
    use bytes::Bytes;
    use rdkafka::error::KafkaError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    const LEASE: Duration = Duration::from_secs(30);
    const H1: i64 = 1_709_647_200; // 2024-03-05T14:00:00Z

    #[derive(Default)]
    struct ScriptedSession {
        records: VecDeque<LogRecord>,
        commits: Arc<Mutex<Vec<i64>>>,
        fail_commit: bool,
    }

    #[async_trait]
    impl LogSession for ScriptedSession {
        async fn poll(&mut self, _timeout: Duration) -> Result<Option<LogRecord>, SourceError> {
            Ok(self.records.pop_front())
        }

        async fn commit(&mut self, next_offset: i64) -> Result<(), SourceError> {
            if self.fail_commit {
                return Err(SourceError::Commit {
                    topic: "events".to_string(),
                    partition: 0,
                    offset: next_offset,
                    source: KafkaError::Canceled,
                });
            }
            self.commits.lock().unwrap().push(next_offset);
            Ok(())
        }
    }

    struct FlakyConnector {
        failures: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl LogConnector for FlakyConnector {
        async fn connect(
            &self,
            topic: &str,
            partition: i32,
        ) -> Result<Box<dyn LogSession>, SourceError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(SourceError::Connect {
                    topic: topic.to_string(),
                    partition,
                    source: KafkaError::ClientCreation("broker unreachable".to_string()),
                });
            }
            Ok(Box::new(ScriptedSession::default()))
        }
    }

    fn record(offset: i64, seconds: i64) -> LogRecord {
        let mut payload = seconds.to_be_bytes().to_vec();
        payload.extend_from_slice(format!("{{\"offset\":{offset}}}").as_bytes());
        LogRecord {
            topic: "events".to_string(),
            partition: 0,
            offset,
            timestamp_ms: None,
            headers: Vec::new(),
            payload: Bytes::from(payload),
        }
    }

    struct Harness {
        _dest: TempDir,
        _spool: TempDir,
        worker: PartitionWorker,
        commits: Arc<Mutex<Vec<i64>>>,
        state: Arc<WorkerState>,
    }

    async fn harness(session: ScriptedSession, dest: TempDir) -> Harness {
        let spool = TempDir::new().unwrap();
        let storage = StorageProvider::for_url_with_options(
            &dest.path().display().to_string(),
            HashMap::new(),
        )
        .await
        .unwrap();
        let uploader = Arc::new(ChunkUploader::new(
            Arc::new(storage),
            ObjectKeyNaming::new(None, TimeBucketFormat::default()),
            "events",
            0,
        ));
        let sink = MultiplexingSink::new(
            KeyExtractor::new(&PartitioningConfig::default()),
            MalformedRecordPolicy::Fail,
            uploader,
            ChunkSettings {
                spool_dir: spool.path().to_path_buf(),
                lease: LEASE,
                stale_after: 3,
            },
            1024,
        );
        let commits = Arc::clone(&session.commits);
        let state = Arc::new(WorkerState::default());
        let worker = PartitionWorker::new(
            "events",
            0,
            Box::new(session),
            sink,
            Duration::from_millis(10),
            Arc::clone(&state),
        );
        Harness {
            _dest: dest,
            _spool: spool,
            worker,
            commits,
            state,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_succeeds() {
        let connector = FlakyConnector {
            failures: 2,
            attempts: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(3),
        };
        let start = tokio::time::Instant::now();
        assert!(connect_with_retry(&connector, "events", 0, policy).await.is_ok());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        // Two pauses between three attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_attempts() {
        let connector = FlakyConnector {
            failures: u32::MAX,
            attempts: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(3),
        };
        let err = connect_with_retry(&connector, "events", 7, policy)
            .await
            .err()
            .unwrap();

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        match err {
            WorkerError::ConnectExhausted {
                topic,
                partition,
                attempts,
                ..
            } => {
                assert_eq!(topic, "events");
                assert_eq!(partition, 7);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_follows_each_upload() {
        let session = ScriptedSession {
            records: VecDeque::from([record(0, H1), record(1, H1 + 1), record(2, H1 + 2)]),
            ..Default::default()
        };
        let mut h = harness(session, TempDir::new().unwrap()).await;
        let t0 = Instant::now();

        for _ in 0..3 {
            h.worker.step_at(t0).await.unwrap();
        }
        assert!(h.commits.lock().unwrap().is_empty());
        assert_eq!(h.state.snapshot().messages, 3);

        h.worker.step_at(t0 + LEASE + Duration::from_secs(1)).await.unwrap();
        assert_eq!(*h.commits.lock().unwrap(), vec![3]);

        let snapshot = h.state.snapshot();
        assert_eq!(snapshot.uploads, 1);
        assert_eq!(snapshot.committed_offset, Some(3));
    }

    #[tokio::test]
    async fn test_no_commit_when_upload_fails() {
        // A regular file where the category directory belongs makes every put fail.
        let dest = TempDir::new().unwrap();
        std::fs::write(dest.path().join("category=events"), b"").unwrap();

        let session = ScriptedSession {
            records: VecDeque::from([record(0, H1)]),
            ..Default::default()
        };
        let mut h = harness(session, dest).await;
        let t0 = Instant::now();

        h.worker.step_at(t0).await.unwrap();
        let err = h
            .worker
            .step_at(t0 + LEASE + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::WorkerSink { .. }));
        assert!(h.commits.lock().unwrap().is_empty());
        assert_eq!(h.state.snapshot().committed_offset, None);
        assert_eq!(h.state.snapshot().uploads, 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_fatal() {
        let session = ScriptedSession {
            records: VecDeque::from([record(0, H1)]),
            fail_commit: true,
            ..Default::default()
        };
        let mut h = harness(session, TempDir::new().unwrap()).await;
        let t0 = Instant::now();
        h.worker.step_at(t0).await.unwrap();

        let err = h
            .worker
            .step_at(t0 + LEASE + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::WorkerSource { .. }));
        assert_eq!(h.state.snapshot().uploads, 1);
        assert_eq!(h.state.snapshot().committed_offset, None);
    }

    #[tokio::test]
    async fn test_run_reports_terminated_phase() {
        let session = ScriptedSession {
            records: VecDeque::from([{
                let mut bad = record(0, H1);
                bad.payload = Bytes::from_static(b"tiny");
                bad
            }]),
            ..Default::default()
        };
        let h = harness(session, TempDir::new().unwrap()).await;
        let state = Arc::clone(&h.state);

        let err = h.worker.run().await.unwrap_err();
        assert!(matches!(err, WorkerError::WorkerSink { .. }));
        assert_eq!(state.snapshot().phase, WorkerPhase::Terminated);
        assert!(h.commits.lock().unwrap().is_empty());
    }
}
