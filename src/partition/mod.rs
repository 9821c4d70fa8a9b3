//! Partition keys and their derivation from log records.
//!
//! Every record is routed to exactly one [`PartitionKey`], made of the
//! start of the record's time bucket plus an optional path component.
//! Two records with equal keys always land in the same chunk sink.

mod bucket;

pub use bucket::{
    BucketGranularity, DEFAULT_TIME_BUCKET_FORMAT, MalformedRecordPolicy, TimeBucketFormat,
    TimestampSource,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::PartitioningConfig;
use crate::error::{KeyError, MalformedRecordSnafu};
use crate::source::LogRecord;

/// Length of the big-endian seconds prefix carried by prefix-timestamped payloads.
pub const TIMESTAMP_PREFIX_LEN: usize = 8;

/// Strip every leading and trailing slash from a path-style key component.
///
/// Runs of slashes are trimmed whole, not one at a time, so the result
/// never starts or ends with `/` and normalizing again is a no-op. Applied
/// when a [`PartitionKey`] is built so that `a/b`, `/a/b/` and `//a/b`
/// address the same sink.
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Identity of a destination chunk stream within one log partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    bucket: DateTime<Utc>,
    extra_path: String,
}

impl PartitionKey {
    pub fn new(bucket: DateTime<Utc>, extra_path: &str) -> Self {
        Self {
            bucket,
            extra_path: normalize_path(extra_path).to_string(),
        }
    }

    /// Start instant of the time bucket.
    pub fn bucket(&self) -> DateTime<Utc> {
        self.bucket
    }

    /// Normalized path component, empty when the key has none.
    pub fn extra_path(&self) -> &str {
        &self.extra_path
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bucket.format("%Y-%m-%dT%H:%MZ"))?;
        if !self.extra_path.is_empty() {
            write!(f, "/{}", self.extra_path)?;
        }
        Ok(())
    }
}

/// A record's partition key together with the bytes to archive for it.
#[derive(Debug, Clone)]
pub struct KeyedPayload {
    pub key: PartitionKey,
    pub payload: Bytes,
}

/// Derives partition keys from records.
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    timestamp: TimestampSource,
    strip_timestamp_prefix: bool,
    granularity: BucketGranularity,
    path_header: Option<String>,
}

impl KeyExtractor {
    pub fn new(config: &PartitioningConfig) -> Self {
        Self {
            timestamp: config.timestamp,
            strip_timestamp_prefix: config.strip_timestamp_prefix,
            granularity: config.granularity,
            path_header: config.path_header.clone(),
        }
    }

    /// Compute the key for `record` and the payload that should be written.
    ///
    /// With [`TimestampSource::Prefix`] the first eight payload bytes are the
    /// event time in seconds; they are dropped from the archived payload
    /// unless prefix stripping is disabled.
    pub fn derive_key(&self, record: &LogRecord) -> Result<KeyedPayload, KeyError> {
        let (timestamp_ms, payload) = match self.timestamp {
            TimestampSource::Prefix => {
                let Some((prefix, _)) = record.payload.split_first_chunk::<TIMESTAMP_PREFIX_LEN>()
                else {
                    return malformed(
                        record,
                        format!(
                            "payload is {} bytes, shorter than the {TIMESTAMP_PREFIX_LEN}-byte timestamp prefix",
                            record.payload.len()
                        ),
                    );
                };
                let seconds = i64::from_be_bytes(*prefix);
                let Some(ms) = seconds.checked_mul(1000) else {
                    return malformed(record, format!("timestamp prefix {seconds} overflows"));
                };
                let payload = if self.strip_timestamp_prefix {
                    record.payload.slice(TIMESTAMP_PREFIX_LEN..)
                } else {
                    record.payload.clone()
                };
                (ms, payload)
            }
            TimestampSource::Log => {
                let Some(ms) = record.timestamp_ms else {
                    return malformed(record, "record carries no log timestamp");
                };
                (ms, record.payload.clone())
            }
        };

        let Some(bucket) = self.granularity.floor(timestamp_ms) else {
            return malformed(record, format!("timestamp {timestamp_ms}ms is out of range"));
        };

        let extra_path = match self.path_header.as_deref().and_then(|name| record.header(name)) {
            Some(raw) => match std::str::from_utf8(raw) {
                Ok(path) => path,
                Err(_) => return malformed(record, "path header is not valid UTF-8"),
            },
            None => "",
        };

        Ok(KeyedPayload {
            key: PartitionKey::new(bucket, extra_path),
            payload,
        })
    }
}

fn malformed<T>(record: &LogRecord, reason: impl Into<String>) -> Result<T, KeyError> {
    MalformedRecordSnafu {
        topic: &record.topic,
        partition: record.partition,
        offset: record.offset,
        reason,
    }
    .fail()
}
