//! Error types for the archiver.
//!
//! Each layer owns a snafu enum. Errors propagate upward with context
//! selectors until they reach [`ArchiverError`], which the binary reports
//! before exiting with a non-zero status.

use snafu::prelude::*;
use std::path::PathBuf;

// ============ Storage Errors ============

/// Errors from the object storage layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid or unsupported destination URL.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Object store operation failed"))]
    ObjectStore { source: object_store::Error },

    /// Local IO failed while staging or preparing data.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 client could not be configured.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },
}

impl StorageError {
    /// Returns true if the error is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors raised while loading or validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("Failed to read config file {}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse YAML config"))]
    YamlParse { source: serde_yaml::Error },

    /// One or more `${VAR}` references could not be resolved.
    #[snafu(display("Environment variable interpolation failed: {message}"))]
    EnvInterpolation { message: String },

    #[snafu(display("No topics configured"))]
    NoTopics,

    #[snafu(display("Topic '{topic}' is configured more than once"))]
    DuplicateTopic { topic: String },

    #[snafu(display("Topic '{topic}' must have at least one partition"))]
    ZeroPartitions { topic: String },

    #[snafu(display("Maximum object size for '{scope}' must be greater than zero"))]
    InvalidObjectSize { scope: String },

    #[snafu(display("Destination URL must not be empty"))]
    EmptyDestination,

    #[snafu(display("Invalid time bucket format '{format}'"))]
    InvalidTimeBucketFormat { format: String },

    #[snafu(display("{field} must be greater than zero"))]
    NonPositiveSetting { field: String },
}

// ============ Partitioning Errors ============

/// Errors raised while deriving a partition key from a record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyError {
    #[snafu(display("Malformed record at {topic}/{partition} offset {offset}: {reason}"))]
    MalformedRecord {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },
}

// ============ Sink Errors ============

/// Errors raised by chunk sinks and the uploader.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    #[snafu(display("Failed to create spool file in {}", dir.display()))]
    CreateSpoolFile {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write record to chunk for {key}"))]
    WriteChunk {
        key: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to finish gzip stream for {key}"))]
    FinishChunk {
        key: String,
        source: std::io::Error,
    },

    /// Chunk upload failed. Offsets covered by the chunk stay uncommitted.
    #[snafu(display("Failed to upload {object_key}"))]
    Upload {
        object_key: String,
        source: StorageError,
    },

    #[snafu(display("Could not derive partition key"))]
    Partitioning { source: KeyError },
}

// ============ Source Errors ============

/// Errors from the partitioned-log client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    #[snafu(display("Failed to open session for {topic}/{partition}"))]
    Connect {
        topic: String,
        partition: i32,
        source: rdkafka::error::KafkaError,
    },

    #[snafu(display("Failed to poll {topic}/{partition}"))]
    Poll {
        topic: String,
        partition: i32,
        source: rdkafka::error::KafkaError,
    },

    #[snafu(display("Failed to commit offset {offset} for {topic}/{partition}"))]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        source: rdkafka::error::KafkaError,
    },

    #[snafu(display("Blocking log client call panicked or was cancelled"))]
    BlockingCall { source: tokio::task::JoinError },
}

// ============ Worker Errors ============

/// Fatal errors that terminate a partition worker.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WorkerError {
    #[snafu(display(
        "Giving up on {topic}/{partition} after {attempts} connection attempts"
    ))]
    ConnectExhausted {
        topic: String,
        partition: i32,
        attempts: u32,
        source: SourceError,
    },

    #[snafu(display("Sink failure in worker {topic}/{partition}"))]
    WorkerSink {
        topic: String,
        partition: i32,
        source: SinkError,
    },

    #[snafu(display("Log client failure in worker {topic}/{partition}"))]
    WorkerSource {
        topic: String,
        partition: i32,
        source: SourceError,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Top-level Errors ============

/// Top-level error for the archiver process.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArchiverError {
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    #[snafu(display("Storage error"))]
    Storage { source: StorageError },

    #[snafu(display("Partition worker failed"))]
    Worker { source: WorkerError },

    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    #[snafu(display("Invalid metrics address"))]
    AddressParse { source: std::net::AddrParseError },

    #[snafu(display("Worker task failed to join"))]
    TaskJoin { source: tokio::task::JoinError },

    #[snafu(display("Failed to create spool directory {}", path.display()))]
    SpoolDir {
        path: PathBuf,
        source: std::io::Error,
    },
}
