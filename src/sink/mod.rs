//! Chunk sinks.
//!
//! A partition worker owns one [`MultiplexingSink`], which routes each
//! record to an [`ObjectChunkSink`] by partition key. Chunk sinks spool
//! gzip data to local disk and hand sealed chunks to the shared
//! [`ChunkUploader`]. Every successful upload yields an [`UploadReceipt`]
//! that the worker drains before deciding whether to commit offsets.

mod chunk;
mod multiplex;
mod naming;
mod object;
mod uploader;

pub use chunk::{ChunkBuffer, SealedChunk};
pub use multiplex::MultiplexingSink;
pub use naming::ObjectKeyNaming;
pub use object::{Appended, ObjectChunkSink};
pub use uploader::ChunkUploader;

use std::path::PathBuf;
use std::time::Duration;

use crate::partition::PartitionKey;

/// Settings shared by all chunk sinks of a worker.
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    /// Directory for gzip spool files.
    pub spool_dir: PathBuf,
    /// Inactivity after which an open chunk is rotated.
    pub lease: Duration,
    /// Consecutive empty rotations before a sink is evicted.
    pub stale_after: u32,
}

/// Completion notice for one uploaded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub partition_key: PartitionKey,
    /// Object key relative to the destination prefix.
    pub object_key: String,
    pub start_offset: i64,
    pub end_offset: i64,
    pub records: u64,
}
