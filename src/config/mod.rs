//! Configuration loading and validation.
//!
//! Configuration is a single YAML document. `${VAR}` references are
//! substituted from the environment before parsing, then the parsed
//! document is validated as a whole.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{
    ConfigError, DuplicateTopicSnafu, EmptyDestinationSnafu, EnvInterpolationSnafu,
    InvalidObjectSizeSnafu, NoTopicsSnafu, NonPositiveSettingSnafu, ReadFileSnafu,
    YamlParseSnafu, ZeroPartitionsSnafu,
};
use crate::partition::{
    BucketGranularity, MalformedRecordPolicy, TimeBucketFormat, TimestampSource,
};

/// One kibibyte.
pub const KB: usize = 1024;

/// Main configuration structure for the archiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub topics: Vec<TopicConfig>,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub partitioning: PartitioningConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Seconds between worker statistics log lines.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_stats_interval_secs() -> u64 {
    30
}

/// Log client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap brokers.
    pub brokers: String,
    /// Consumer group under which offsets are committed.
    pub group_id: String,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Session establishment attempts before a partition is given up on.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    /// Extra librdkafka properties, applied last.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_connect_retries() -> u32 {
    3
}

fn default_connect_retry_delay_ms() -> u64 {
    3000
}

impl KafkaConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

/// A topic to archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    /// Partitions `0..partitions` are archived.
    pub partitions: i32,
    /// Overrides `destination.max_object_size` for this topic.
    #[serde(default)]
    pub max_object_size: Option<usize>,
}

/// Object storage destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// `s3://bucket/prefix`, `file:///path` or a bare local path.
    pub url: String,
    /// Credentials, region, endpoint and other store options.
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
    /// Stripped from topic names when forming the `category=` segment.
    #[serde(default)]
    pub topic_prefix: Option<String>,
    /// Uncompressed payload bytes per chunk before rotation.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: usize,
    #[serde(default)]
    pub time_bucket_format: TimeBucketFormat,
    /// Directory for spool files. Defaults to the system temp dir.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_max_object_size() -> usize {
    KB
}

/// Chunk sink timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Milliseconds of inactivity after which a sink rotates its chunk.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    /// Consecutive empty rotations after which a sink is evicted.
    #[serde(default = "default_stale_after")]
    pub stale_after: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            lease_ms: default_lease_ms(),
            stale_after: default_stale_after(),
        }
    }
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_stale_after() -> u32 {
    3
}

impl SinkConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }
}

/// How records map to partition keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitioningConfig {
    #[serde(default)]
    pub timestamp: TimestampSource,
    /// Drop the 8-byte timestamp prefix from archived payloads.
    #[serde(default = "default_strip_timestamp_prefix")]
    pub strip_timestamp_prefix: bool,
    #[serde(default)]
    pub granularity: BucketGranularity,
    /// Record header whose value becomes an extra key path component.
    #[serde(default)]
    pub path_header: Option<String>,
    #[serde(default)]
    pub on_malformed: MalformedRecordPolicy,
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            timestamp: TimestampSource::default(),
            strip_timestamp_prefix: default_strip_timestamp_prefix(),
            granularity: BucketGranularity::default(),
            path_header: None,
            on_malformed: MalformedRecordPolicy::default(),
        }
    }
}

fn default_strip_timestamp_prefix() -> bool {
    true
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file, substituting `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let content = vars::interpolate(content).map_err(|missing| {
            EnvInterpolationSnafu {
                message: missing.join("; "),
            }
            .build()
        })?;
        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.topics.is_empty(), NoTopicsSnafu);
        ensure!(!self.destination.url.trim().is_empty(), EmptyDestinationSnafu);
        ensure!(
            self.destination.max_object_size > 0,
            InvalidObjectSizeSnafu { scope: "destination" }
        );
        ensure!(
            self.sink.stale_after > 0,
            NonPositiveSettingSnafu { field: "sink.stale_after" }
        );
        ensure!(
            self.kafka.connect_retries > 0,
            NonPositiveSettingSnafu { field: "kafka.connect_retries" }
        );
        ensure!(
            self.stats_interval_secs > 0,
            NonPositiveSettingSnafu { field: "stats_interval_secs" }
        );

        let mut seen = HashSet::new();
        for topic in &self.topics {
            ensure!(
                seen.insert(topic.name.as_str()),
                DuplicateTopicSnafu { topic: &topic.name }
            );
            ensure!(topic.partitions > 0, ZeroPartitionsSnafu { topic: &topic.name });
            ensure!(
                topic.max_object_size != Some(0),
                InvalidObjectSizeSnafu { scope: &topic.name }
            );
        }
        Ok(())
    }

    /// Chunk size limit for `topic`, falling back to the destination default.
    pub fn max_object_size_for(&self, topic: &str) -> usize {
        self.topics
            .iter()
            .find(|t| t.name == topic)
            .and_then(|t| t.max_object_size)
            .unwrap_or(self.destination.max_object_size)
    }

    /// Number of partition workers the configuration asks for.
    pub fn total_partitions(&self) -> usize {
        self.topics.iter().map(|t| t.partitions as usize).sum()
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Directory where chunk spool files are created.
    pub fn spool_dir(&self) -> PathBuf {
        self.destination
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
