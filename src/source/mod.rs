//! Partitioned-log client abstraction.
//!
//! A [`LogConnector`] opens one [`LogSession`] per (topic, partition). A
//! session yields records in offset order and accepts commits of the next
//! offset to consume. The Kafka implementation lives in [`kafka`].

pub mod kafka;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::SourceError;

pub use kafka::KafkaConnector;

/// A single record read from a log partition.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Log-assigned timestamp in milliseconds, when the log provides one.
    pub timestamp_ms: Option<i64>,
    pub headers: Vec<(String, Bytes)>,
    pub payload: Bytes,
}

impl LogRecord {
    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_ref())
    }
}

/// A consuming session bound to one partition.
#[async_trait]
pub trait LogSession: Send {
    /// Wait up to `timeout` for the next record. `Ok(None)` means the wait
    /// elapsed without a record and is not an error.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>, SourceError>;

    /// Durably record that every offset below `next_offset` has been archived.
    async fn commit(&mut self, next_offset: i64) -> Result<(), SourceError>;
}

/// Opens sessions against the log.
#[async_trait]
pub trait LogConnector: Send + Sync {
    async fn connect(&self, topic: &str, partition: i32) -> Result<Box<dyn LogSession>, SourceError>;
}
