//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a partition
//! worker or the storage layer. Events implement the `InternalEvent` trait,
//! which records the corresponding Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted for every record taken off the log.
pub struct RecordConsumed<'a> {
    pub topic: &'a str,
    pub partition: i32,
    /// Payload bytes written into a chunk, zero for a skipped record.
    pub bytes: u64,
}

impl InternalEvent for RecordConsumed<'_> {
    fn emit(self) {
        trace!(
            topic = self.topic,
            partition = self.partition,
            bytes = self.bytes,
            "Record consumed"
        );
        let partition = self.partition.to_string();
        counter!(
            "snowdrift_records_consumed_total",
            "topic" => self.topic.to_owned(),
            "partition" => partition.clone()
        )
        .increment(1);
        counter!(
            "snowdrift_bytes_appended_total",
            "topic" => self.topic.to_owned(),
            "partition" => partition
        )
        .increment(self.bytes);
    }
}

/// Event emitted when a sealed chunk reaches object storage.
pub struct ChunkUploaded<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub records: u64,
    pub compressed_bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for ChunkUploaded<'_> {
    fn emit(self) {
        trace!(
            topic = self.topic,
            partition = self.partition,
            records = self.records,
            compressed_bytes = self.compressed_bytes,
            duration_ms = self.duration.as_millis(),
            "Chunk uploaded"
        );
        counter!("snowdrift_chunks_uploaded_total", "topic" => self.topic.to_owned()).increment(1);
        counter!("snowdrift_uploaded_bytes_total", "topic" => self.topic.to_owned())
            .increment(self.compressed_bytes);
        histogram!("snowdrift_upload_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a sink rotates without any buffered record.
pub struct EmptyRotation<'a> {
    pub topic: &'a str,
    pub partition: i32,
}

impl InternalEvent for EmptyRotation<'_> {
    fn emit(self) {
        trace!(topic = self.topic, partition = self.partition, "Empty rotation");
        counter!("snowdrift_empty_rotations_total", "topic" => self.topic.to_owned()).increment(1);
    }
}

/// Event emitted when an idle sink is closed and dropped.
pub struct SinkEvicted<'a> {
    pub topic: &'a str,
    pub partition: i32,
}

impl InternalEvent for SinkEvicted<'_> {
    fn emit(self) {
        trace!(topic = self.topic, partition = self.partition, "Sink evicted");
        counter!("snowdrift_sinks_evicted_total", "topic" => self.topic.to_owned()).increment(1);
    }
}

/// Event emitted when the number of live sinks in a worker changes.
pub struct ActiveSinks<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub count: usize,
}

impl InternalEvent for ActiveSinks<'_> {
    fn emit(self) {
        gauge!(
            "snowdrift_active_sinks",
            "topic" => self.topic.to_owned(),
            "partition" => self.partition.to_string()
        )
        .set(self.count as f64);
    }
}

/// Event emitted after an offset commit succeeds.
pub struct OffsetCommitted<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
}

impl InternalEvent for OffsetCommitted<'_> {
    fn emit(self) {
        trace!(
            topic = self.topic,
            partition = self.partition,
            offset = self.offset,
            "Offset committed"
        );
        let partition = self.partition.to_string();
        counter!(
            "snowdrift_offset_commits_total",
            "topic" => self.topic.to_owned(),
            "partition" => partition.clone()
        )
        .increment(1);
        gauge!(
            "snowdrift_committed_offset",
            "topic" => self.topic.to_owned(),
            "partition" => partition
        )
        .set(self.offset as f64);
    }
}

/// Event emitted when a malformed record is skipped instead of failing.
pub struct MalformedRecordSkipped<'a> {
    pub topic: &'a str,
    pub partition: i32,
}

impl InternalEvent for MalformedRecordSkipped<'_> {
    fn emit(self) {
        trace!(topic = self.topic, partition = self.partition, "Malformed record skipped");
        counter!("snowdrift_malformed_records_skipped_total", "topic" => self.topic.to_owned())
            .increment(1);
    }
}

/// Event emitted when opening a log session fails and will be retried.
pub struct ConnectRetry<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub attempt: u32,
}

impl InternalEvent for ConnectRetry<'_> {
    fn emit(self) {
        trace!(
            topic = self.topic,
            partition = self.partition,
            attempt = self.attempt,
            "Connect retry"
        );
        counter!("snowdrift_connect_failures_total", "topic" => self.topic.to_owned()).increment(1);
    }
}

/// Event emitted when a worker stops on a fatal error.
pub struct WorkerFailed<'a> {
    pub topic: &'a str,
    pub partition: i32,
}

impl InternalEvent for WorkerFailed<'_> {
    fn emit(self) {
        trace!(topic = self.topic, partition = self.partition, "Worker failed");
        counter!("snowdrift_worker_failures_total", "topic" => self.topic.to_owned()).increment(1);
    }
}

// ============================================================================
// Storage events
// ============================================================================

/// Type of storage operation.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "snowdrift_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the latency of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "snowdrift_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
