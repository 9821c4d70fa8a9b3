//! Uploads sealed chunks to the destination.

use object_store::path::Path;
use snafu::prelude::*;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use super::UploadReceipt;
use super::chunk::SealedChunk;
use super::naming::ObjectKeyNaming;
use crate::emit;
use crate::error::{SinkError, UploadSnafu};
use crate::metrics::events::ChunkUploaded;
use crate::partition::PartitionKey;
use crate::storage::StorageProviderRef;

/// Names and uploads chunks for one log partition. Shared by every sink
/// the partition's worker owns.
pub struct ChunkUploader {
    storage: StorageProviderRef,
    naming: ObjectKeyNaming,
    topic: String,
    partition: i32,
}

impl ChunkUploader {
    pub fn new(
        storage: StorageProviderRef,
        naming: ObjectKeyNaming,
        topic: impl Into<String>,
        partition: i32,
    ) -> Self {
        Self {
            storage,
            naming,
            topic: topic.into(),
            partition,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Upload `chunk` under a fresh object key.
    ///
    /// The spool file is deleted when this returns, whether or not the
    /// upload succeeded. A failed upload leaves its offsets uncommitted.
    pub async fn commit(
        &self,
        key: &PartitionKey,
        chunk: SealedChunk,
    ) -> Result<UploadReceipt, SinkError> {
        let object_key = self.naming.object_key(
            &self.topic,
            self.partition,
            key,
            chunk.start_offset,
            chunk.end_offset,
            Uuid::new_v4(),
        );

        let start = Instant::now();
        let compressed_bytes = self
            .storage
            .put_file(&Path::from(object_key.as_str()), &chunk.path)
            .await
            .context(UploadSnafu {
                object_key: &object_key,
            })?;
        let duration = start.elapsed();

        emit!(ChunkUploaded {
            topic: &self.topic,
            partition: self.partition,
            records: chunk.records,
            compressed_bytes,
            duration,
        });
        info!(
            topic = %self.topic,
            partition = self.partition,
            %key,
            object_key = %object_key,
            start_offset = chunk.start_offset,
            end_offset = chunk.end_offset,
            records = chunk.records,
            uncompressed_bytes = chunk.uncompressed_bytes,
            compressed_bytes,
            duration_ms = duration.as_millis(),
            "Uploaded chunk"
        );

        Ok(UploadReceipt {
            partition_key: key.clone(),
            object_key,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            records: chunk.records,
        })
    }
}
