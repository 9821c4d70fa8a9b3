//! Kafka log client built on rdkafka.
//!
//! Each session owns a dedicated consumer with a manual assignment of a
//! single partition. Manual assignment keeps partitions from moving between
//! workers, so a commit always refers to records this process archived.
//! Auto-commit is disabled; offsets are only written through
//! [`LogSession::commit`].

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{LogConnector, LogRecord, LogSession};
use crate::config::KafkaConfig;
use crate::error::{BlockingCallSnafu, CommitSnafu, ConnectSnafu, PollSnafu, SourceError};

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens one rdkafka consumer per assigned partition.
pub struct KafkaConnector {
    client_config: ClientConfig,
}

impl KafkaConnector {
    pub fn new(config: &KafkaConfig) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("session.timeout.ms", "6000")
            // Start from the smallest available offset when the group has no commit yet.
            .set("auto.offset.reset", "smallest");

        for (key, value) in &config.options {
            client_config.set(key, value);
        }

        Self { client_config }
    }
}

#[async_trait]
impl LogConnector for KafkaConnector {
    async fn connect(&self, topic: &str, partition: i32) -> Result<Box<dyn LogSession>, SourceError> {
        let consumer: StreamConsumer = self
            .client_config
            .create()
            .context(ConnectSnafu { topic, partition })?;
        let consumer = Arc::new(consumer);

        // Creating a consumer never touches the network. A metadata round-trip
        // proves the brokers are reachable and the partition exists.
        let probe = Arc::clone(&consumer);
        let probe_topic = topic.to_string();
        let metadata = tokio::task::spawn_blocking(move || {
            probe.fetch_metadata(Some(&probe_topic), METADATA_TIMEOUT)
        })
        .await
        .context(BlockingCallSnafu)?
        .context(ConnectSnafu { topic, partition })?;

        let partition_known = metadata
            .topics()
            .iter()
            .filter(|t| t.name() == topic)
            .flat_map(|t| t.partitions())
            .any(|p| p.id() == partition);
        if !partition_known {
            return Err(KafkaError::MetadataFetch(RDKafkaErrorCode::UnknownPartition))
                .context(ConnectSnafu { topic, partition });
        }

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, Offset::Stored)
            .context(ConnectSnafu { topic, partition })?;
        consumer
            .assign(&assignment)
            .context(ConnectSnafu { topic, partition })?;

        info!(topic, partition, "Kafka session assigned");

        Ok(Box::new(KafkaSession {
            consumer,
            topic: topic.to_string(),
            partition,
        }))
    }
}

struct KafkaSession {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
}

#[async_trait]
impl LogSession for KafkaSession {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>, SourceError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(received) => {
                let message = received.context(PollSnafu {
                    topic: &self.topic,
                    partition: self.partition,
                })?;
                Ok(Some(to_record(&message)))
            }
        }
    }

    async fn commit(&mut self, next_offset: i64) -> Result<(), SourceError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(next_offset))
            .context(CommitSnafu {
                topic: &self.topic,
                partition: self.partition,
                offset: next_offset,
            })?;

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .context(BlockingCallSnafu)?
            .context(CommitSnafu {
                topic: &self.topic,
                partition: self.partition,
                offset: next_offset,
            })?;

        debug!(topic = %self.topic, partition = self.partition, next_offset, "Offset committed");
        Ok(())
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> LogRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    let value = header.value.map(Bytes::copy_from_slice).unwrap_or_default();
                    (header.key.to_string(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    LogRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp_ms: message.timestamp().to_millis(),
        headers,
        payload: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
    }
}
