//! Routes records of one log partition to per-key chunk sinks.

use snafu::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::object::ObjectChunkSink;
use super::uploader::ChunkUploader;
use super::{ChunkSettings, UploadReceipt};
use crate::emit;
use crate::error::{PartitioningSnafu, SinkError};
use crate::metrics::events::{ActiveSinks, MalformedRecordSkipped, SinkEvicted};
use crate::partition::{KeyExtractor, MalformedRecordPolicy, PartitionKey};
use crate::source::LogRecord;

/// Owns every chunk sink of a partition worker.
///
/// Sinks are created on the first record for their key and evicted once
/// they go stale. Upload receipts accumulate until the worker drains them
/// with [`take_completed`](Self::take_completed).
pub struct MultiplexingSink {
    extractor: KeyExtractor,
    on_malformed: MalformedRecordPolicy,
    uploader: Arc<ChunkUploader>,
    settings: Arc<ChunkSettings>,
    max_object_size: usize,
    sinks: HashMap<PartitionKey, ObjectChunkSink>,
    completed: Vec<UploadReceipt>,
    uploads: u64,
    next_offset: Option<i64>,
}

impl MultiplexingSink {
    pub fn new(
        extractor: KeyExtractor,
        on_malformed: MalformedRecordPolicy,
        uploader: Arc<ChunkUploader>,
        settings: ChunkSettings,
        max_object_size: usize,
    ) -> Self {
        Self {
            extractor,
            on_malformed,
            uploader,
            settings: Arc::new(settings),
            max_object_size,
            sinks: HashMap::new(),
            completed: Vec::new(),
            uploads: 0,
            next_offset: None,
        }
    }

    /// Route `record` to the sink for its partition key. Returns the number
    /// of payload bytes written, zero for a skipped malformed record.
    pub async fn append(&mut self, record: &LogRecord, now: Instant) -> Result<usize, SinkError> {
        let keyed = match self.extractor.derive_key(record) {
            Ok(keyed) => keyed,
            Err(error) if self.on_malformed == MalformedRecordPolicy::Skip => {
                warn!(%error, "Skipping malformed record");
                emit!(MalformedRecordSkipped {
                    topic: self.uploader.topic(),
                    partition: self.uploader.partition(),
                });
                self.next_offset = Some(record.offset + 1);
                return Ok(0);
            }
            Err(error) => return Err(error).context(PartitioningSnafu),
        };

        let created = !self.sinks.contains_key(&keyed.key);
        let sink = match self.sinks.entry(keyed.key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(key = %entry.key(), "Opening sink");
                let sink = ObjectChunkSink::new(
                    entry.key().clone(),
                    Arc::clone(&self.uploader),
                    Arc::clone(&self.settings),
                    self.max_object_size,
                    now,
                );
                entry.insert(sink)
            }
        };

        let appended = sink.append(record.offset, &keyed.payload, now).await?;
        if let Some(receipt) = appended.receipt {
            self.record_upload(receipt);
        }
        self.next_offset = Some(record.offset + 1);
        if created {
            self.report_active_sinks();
        }

        Ok(appended.bytes)
    }

    /// Rotate sinks whose lease expired, then evict the stale ones.
    pub async fn check_file_lease(&mut self, now: Instant) -> Result<(), SinkError> {
        let mut receipts = Vec::new();
        for sink in self.sinks.values_mut() {
            if let Some(receipt) = sink.check_lease(now).await? {
                receipts.push(receipt);
            }
        }
        for receipt in receipts {
            self.record_upload(receipt);
        }

        let stale: Vec<PartitionKey> = self
            .sinks
            .iter()
            .filter(|(_, sink)| sink.is_stale())
            .map(|(key, _)| key.clone())
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        for key in stale {
            if let Some(sink) = self.sinks.remove(&key) {
                debug!(%key, "Evicting stale sink");
                sink.close();
                emit!(SinkEvicted {
                    topic: self.uploader.topic(),
                    partition: self.uploader.partition(),
                });
            }
        }
        self.report_active_sinks();
        Ok(())
    }

    fn record_upload(&mut self, receipt: UploadReceipt) {
        self.uploads += 1;
        self.completed.push(receipt);
    }

    fn report_active_sinks(&self) {
        emit!(ActiveSinks {
            topic: self.uploader.topic(),
            partition: self.uploader.partition(),
            count: self.sinks.len(),
        });
    }

    /// Drain receipts for uploads completed since the last call.
    pub fn take_completed(&mut self) -> Vec<UploadReceipt> {
        std::mem::take(&mut self.completed)
    }

    /// Completed uploads across all sinks, including evicted ones.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn active_sinks(&self) -> usize {
        self.sinks.len()
    }

    /// Highest offset that can be committed: every record below it has
    /// been uploaded or deliberately skipped.
    ///
    /// This is the oldest offset still buffered in any sink, or one past
    /// the last consumed record when nothing is buffered.
    pub fn committable_offset(&self) -> Option<i64> {
        self.sinks
            .values()
            .filter_map(ObjectChunkSink::pending_start_offset)
            .min()
            .or(self.next_offset)
    }

    /// Close every sink without uploading.
    pub fn close_all(&mut self) {
        for (_, sink) in self.sinks.drain() {
            sink.close();
        }
        self.report_active_sinks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitioningConfig;
    use crate::partition::TimeBucketFormat;
    use crate::sink::naming::ObjectKeyNaming;
    use crate::storage::StorageProvider;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    const LEASE: Duration = Duration::from_secs(30);
    const H1: i64 = 1_709_647_200; // 2024-03-05T14:00:00Z

    struct Harness {
        _dest: TempDir,
        _spool: TempDir,
        sink: MultiplexingSink,
    }

    async fn harness(policy: MalformedRecordPolicy, max_object_size: usize) -> Harness {
        let dest = TempDir::new().unwrap();
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
            policy,
            uploader,
            ChunkSettings {
                spool_dir: spool.path().to_path_buf(),
                lease: LEASE,
                stale_after: 2,
            },
            max_object_size,
        );
        Harness {
            _dest: dest,
            _spool: spool,
            sink,
        }
    }

    fn record(offset: i64, seconds: i64, body: &[u8]) -> LogRecord {
        let mut payload = seconds.to_be_bytes().to_vec();
        payload.extend_from_slice(body);
        LogRecord {
            topic: "events".to_string(),
            partition: 0,
            offset,
            timestamp_ms: None,
            headers: Vec::new(),
            payload: Bytes::from(payload),
        }
    }

    #[tokio::test]
    async fn test_routes_records_by_bucket() {
        let mut h = harness(MalformedRecordPolicy::Fail, 1024).await;
        let now = Instant::now();

        let written = h.sink.append(&record(0, H1, b"abc"), now).await.unwrap();
        assert_eq!(written, 3);
        h.sink.append(&record(1, H1 + 60, b"d"), now).await.unwrap();
        h.sink.append(&record(2, H1 + 3600, b"e"), now).await.unwrap();

        assert_eq!(h.sink.active_sinks(), 2);
        assert_eq!(h.sink.committable_offset(), Some(0));
        assert_eq!(h.sink.uploads(), 0);
    }

    #[tokio::test]
    async fn test_watermark_tracks_oldest_pending_chunk() {
        let mut h = harness(MalformedRecordPolicy::Fail, 1024).await;
        let t0 = Instant::now();

        h.sink.append(&record(0, H1, b"a"), t0).await.unwrap();
        h.sink.append(&record(1, H1, b"b"), t0).await.unwrap();
        let t1 = t0 + Duration::from_secs(20);
        h.sink.append(&record(2, H1 + 3600, b"c"), t1).await.unwrap();

        // Only the H1 sink has been idle past its lease.
        h.sink.check_file_lease(t0 + LEASE + Duration::from_secs(1)).await.unwrap();
        let completed = h.sink.take_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!((completed[0].start_offset, completed[0].end_offset), (0, 2));
        assert_eq!(
            completed[0].partition_key.bucket(),
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()
        );
        assert_eq!(h.sink.committable_offset(), Some(2));

        h.sink.check_file_lease(t1 + LEASE + Duration::from_secs(1)).await.unwrap();
        assert_eq!(h.sink.take_completed().len(), 1);
        assert_eq!(h.sink.committable_offset(), Some(3));
        assert_eq!(h.sink.uploads(), 2);
        assert!(h.sink.take_completed().is_empty());
    }

    #[tokio::test]
    async fn test_stale_sinks_are_evicted() {
        let mut h = harness(MalformedRecordPolicy::Fail, 1024).await;
        let mut now = Instant::now();
        h.sink.append(&record(0, H1, b"a"), now).await.unwrap();

        let step = LEASE + Duration::from_secs(1);
        for _ in 0..3 {
            now += step;
            h.sink.check_file_lease(now).await.unwrap();
        }
        assert_eq!(h.sink.active_sinks(), 0);
        assert_eq!(h.sink.uploads(), 1);
        assert_eq!(h.sink.committable_offset(), Some(1));
    }

    #[tokio::test]
    async fn test_evicted_key_gets_fresh_sink() {
        let mut h = harness(MalformedRecordPolicy::Fail, 1024).await;
        let mut now = Instant::now();
        h.sink.append(&record(0, H1, b"a"), now).await.unwrap();

        let step = LEASE + Duration::from_secs(1);
        for _ in 0..3 {
            now += step;
            h.sink.check_file_lease(now).await.unwrap();
        }
        assert_eq!(h.sink.active_sinks(), 0);
        assert_eq!(h.sink.take_completed().len(), 1);

        h.sink.append(&record(5, H1 + 10, b"b"), now).await.unwrap();
        assert_eq!(h.sink.active_sinks(), 1);
        assert_eq!(h.sink.committable_offset(), Some(5));

        h.sink.check_file_lease(now + step).await.unwrap();
        let completed = h.sink.take_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!((completed[0].start_offset, completed[0].end_offset), (5, 6));
        assert_eq!(completed[0].records, 1);
        assert_eq!(h.sink.committable_offset(), Some(6));
    }

    #[tokio::test]
    async fn test_malformed_record_fails_by_default() {
        let mut h = harness(MalformedRecordPolicy::Fail, 1024).await;
        let mut bad = record(0, H1, b"");
        bad.payload = Bytes::from_static(b"short");

        let err = h.sink.append(&bad, Instant::now()).await.unwrap_err();
        assert!(matches!(err, SinkError::Partitioning { .. }));
        assert_eq!(h.sink.committable_offset(), None);
    }

    #[tokio::test]
    async fn test_malformed_record_skipped_when_configured() {
        let mut h = harness(MalformedRecordPolicy::Skip, 1024).await;
        let mut bad = record(0, H1, b"");
        bad.payload = Bytes::from_static(b"short");

        assert_eq!(h.sink.append(&bad, Instant::now()).await.unwrap(), 0);
        assert_eq!(h.sink.active_sinks(), 0);
        assert_eq!(h.sink.committable_offset(), Some(1));
    }

    #[tokio::test]
    async fn test_close_all_drops_sinks() {
        let mut h = harness(MalformedRecordPolicy::Fail, 1024).await;
        h.sink.append(&record(0, H1, b"a"), Instant::now()).await.unwrap();
        h.sink.close_all();
        assert_eq!(h.sink.active_sinks(), 0);
        assert!(h.sink.take_completed().is_empty());
    }
}
