//! Time bucketing for partition keys.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{ConfigError, InvalidTimeBucketFormatSnafu};

/// Default layout of the time-bucket portion of an object key.
pub const DEFAULT_TIME_BUCKET_FORMAT: &str = "year=%Y/month=%m/day=%d/hour=%H";

/// Where the event time of a record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampSource {
    /// First 8 payload bytes, big-endian signed seconds since the epoch.
    #[default]
    Prefix,
    /// Timestamp attached to the record by the log.
    Log,
}

/// Width of a time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketGranularity {
    #[default]
    Hour,
    Day,
}

impl BucketGranularity {
    fn width_secs(self) -> i64 {
        match self {
            BucketGranularity::Hour => 3_600,
            BucketGranularity::Day => 86_400,
        }
    }

    /// Truncate a millisecond timestamp to the start of its bucket.
    ///
    /// Returns `None` when the instant is outside the representable range.
    pub fn floor(self, timestamp_ms: i64) -> Option<DateTime<Utc>> {
        let secs = timestamp_ms.div_euclid(1000);
        let floored = secs - secs.rem_euclid(self.width_secs());
        DateTime::from_timestamp(floored, 0)
    }
}

/// What to do with a record whose partition key cannot be derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedRecordPolicy {
    /// Terminate the worker.
    #[default]
    Fail,
    /// Log, count, and move past the record.
    Skip,
}

/// A validated strftime layout used to render a bucket into a key segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeBucketFormat(String);

impl TimeBucketFormat {
    pub fn parse(format: impl Into<String>) -> Result<Self, ConfigError> {
        let format = format.into();
        let invalid = format.is_empty()
            || StrftimeItems::new(&format).any(|item| matches!(item, Item::Error));
        ensure!(!invalid, InvalidTimeBucketFormatSnafu { format: &format });
        Ok(Self(format))
    }

    /// Render a bucket start instant.
    pub fn render(&self, bucket: DateTime<Utc>) -> String {
        bucket.format(&self.0).to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TimeBucketFormat {
    fn default() -> Self {
        Self(DEFAULT_TIME_BUCKET_FORMAT.to_string())
    }
}

impl TryFrom<String> for TimeBucketFormat {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TimeBucketFormat> for String {
    fn from(value: TimeBucketFormat) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_floor() {
        // 2024-03-05T14:37:12.345Z
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 37, 12).unwrap().timestamp_millis() + 345;
        let bucket = BucketGranularity::Hour.floor(ts).unwrap();
        assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_day_floor() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 59).unwrap().timestamp_millis();
        let bucket = BucketGranularity::Day.floor(ts).unwrap();
        assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_floor_before_epoch() {
        // 1969-12-31T23:30:00Z floors to 23:00, not to the epoch.
        let bucket = BucketGranularity::Hour.floor(-30 * 60 * 1000).unwrap();
        assert_eq!(bucket, Utc.with_ymd_and_hms(1969, 12, 31, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_floor_out_of_range() {
        assert!(BucketGranularity::Hour.floor(i64::MAX).is_none());
    }

    #[test]
    fn test_default_format_renders_hive_layout() {
        let bucket = Utc.with_ymd_and_hms(2024, 1, 9, 7, 0, 0).unwrap();
        let rendered = TimeBucketFormat::default().render(bucket);
        assert_eq!(rendered, "year=2024/month=01/day=09/hour=07");
    }

    #[test]
    fn test_invalid_format_rejected() {
        assert!(TimeBucketFormat::parse("year=%Y/%Q").is_err());
        assert!(TimeBucketFormat::parse("").is_err());
        assert!(TimeBucketFormat::parse("dt=%Y-%m-%d").is_ok());
    }

    #[test]
    fn test_format_deserializes_with_validation() {
        let ok: TimeBucketFormat = serde_yaml::from_str("\"dt=%Y%m%d\"").unwrap();
        assert_eq!(ok.as_str(), "dt=%Y%m%d");

        let err = serde_yaml::from_str::<TimeBucketFormat>("\"%Q\"");
        assert!(err.is_err());
    }
}
