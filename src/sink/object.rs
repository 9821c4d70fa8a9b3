//! Chunk sink for a single partition key.

use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::chunk::ChunkBuffer;
use super::uploader::ChunkUploader;
use super::{ChunkSettings, UploadReceipt};
use crate::emit;
use crate::error::SinkError;
use crate::metrics::events::EmptyRotation;
use crate::partition::PartitionKey;

/// Result of appending one record.
#[derive(Debug)]
pub struct Appended {
    /// Payload bytes written.
    pub bytes: usize,
    /// Set when the append forced a size rotation that uploaded a chunk.
    pub receipt: Option<UploadReceipt>,
}

/// Accumulates records for one [`PartitionKey`] and rotates them into
/// uploaded chunks on size or inactivity.
///
/// The gzip buffer opens lazily on the first append after a rotation, so
/// a rotation with nothing buffered creates no spool file.
pub struct ObjectChunkSink {
    key: PartitionKey,
    uploader: Arc<ChunkUploader>,
    settings: Arc<ChunkSettings>,
    max_object_size: usize,
    buffer: Option<ChunkBuffer>,
    rotations: u64,
    empty_rotations: u32,
    last_activity: Instant,
}

impl ObjectChunkSink {
    pub fn new(
        key: PartitionKey,
        uploader: Arc<ChunkUploader>,
        settings: Arc<ChunkSettings>,
        max_object_size: usize,
        now: Instant,
    ) -> Self {
        Self {
            key,
            uploader,
            settings,
            max_object_size,
            buffer: None,
            rotations: 0,
            empty_rotations: 0,
            last_activity: now,
        }
    }

    /// Write one record, rotating first if it would push a non-empty chunk
    /// past the size limit. A record larger than the limit on its own still
    /// gets a chunk to itself.
    pub async fn append(
        &mut self,
        offset: i64,
        payload: &[u8],
        now: Instant,
    ) -> Result<Appended, SinkError> {
        let overflows = self.buffer.as_ref().is_some_and(|buffer| {
            !buffer.is_empty() && buffer.bytes_written() + payload.len() > self.max_object_size
        });
        let receipt = if overflows {
            self.rotate(now).await?
        } else {
            None
        };

        let mut buffer = match self.buffer.take() {
            Some(buffer) => buffer,
            None => ChunkBuffer::create(&self.settings.spool_dir, self.key.to_string())?,
        };
        buffer.write_record(offset, payload)?;
        self.buffer = Some(buffer);
        self.last_activity = now;

        Ok(Appended {
            bytes: payload.len(),
            receipt,
        })
    }

    /// Rotate if the sink has been idle for longer than the lease.
    pub async fn check_lease(&mut self, now: Instant) -> Result<Option<UploadReceipt>, SinkError> {
        if now.saturating_duration_since(self.last_activity) > self.settings.lease {
            self.rotate(now).await
        } else {
            Ok(None)
        }
    }

    /// Seal and upload the open chunk, if it holds any record.
    ///
    /// A rotation with nothing to upload counts toward staleness, except
    /// for the very first rotation of the sink.
    pub async fn rotate(&mut self, now: Instant) -> Result<Option<UploadReceipt>, SinkError> {
        self.last_activity = now;
        let first_rotation = self.rotations == 0;
        self.rotations += 1;

        let sealed = match self.buffer.take() {
            Some(buffer) => buffer.seal()?,
            None => None,
        };

        let Some(chunk) = sealed else {
            if !first_rotation {
                self.empty_rotations += 1;
                emit!(EmptyRotation {
                    topic: self.uploader.topic(),
                    partition: self.uploader.partition(),
                });
            }
            debug!(
                key = %self.key,
                empty_rotations = self.empty_rotations,
                "Rotated empty sink"
            );
            return Ok(None);
        };

        let receipt = self.uploader.commit(&self.key, chunk).await?;
        self.empty_rotations = 0;
        Ok(Some(receipt))
    }

    /// True once enough consecutive empty rotations have happened.
    pub fn is_stale(&self) -> bool {
        self.empty_rotations >= self.settings.stale_after
    }

    /// Offset of the oldest record not yet uploaded.
    pub fn pending_start_offset(&self) -> Option<i64> {
        self.buffer.as_ref().and_then(ChunkBuffer::start_offset)
    }

    /// Drop the sink without uploading. Buffered records stay uncommitted
    /// and will be consumed again after a restart.
    pub fn close(self) {
        if let Some(buffer) = &self.buffer {
            debug!(
                key = %self.key,
                records = buffer.records(),
                "Discarding unuploaded chunk on close"
            );
        }
    }
}
