//! Object key layout.
//!
//! Keys are relative to the destination prefix:
//!
//! ```text
//! category=<topic>/<time bucket>/[<extra path>/]<partition>:<start>:<end>:<uuid>.gz
//! ```
//!
//! `start` is the first offset in the chunk and `end` is one past the last.

use uuid::Uuid;

use crate::partition::{PartitionKey, TimeBucketFormat};

#[derive(Debug, Clone)]
pub struct ObjectKeyNaming {
    topic_prefix: Option<String>,
    time_format: TimeBucketFormat,
}

impl ObjectKeyNaming {
    pub fn new(topic_prefix: Option<String>, time_format: TimeBucketFormat) -> Self {
        Self {
            topic_prefix,
            time_format,
        }
    }

    /// Topic name with the configured prefix removed.
    pub fn category<'a>(&self, topic: &'a str) -> &'a str {
        match self.topic_prefix.as_deref() {
            Some(prefix) => match topic.strip_prefix(prefix) {
                Some(rest) if !rest.is_empty() => rest,
                _ => topic,
            },
            None => topic,
        }
    }

    pub fn object_key(
        &self,
        topic: &str,
        partition: i32,
        key: &PartitionKey,
        start_offset: i64,
        end_offset: i64,
        id: Uuid,
    ) -> String {
        let mut object_key = format!(
            "category={}/{}/",
            self.category(topic),
            self.time_format.render(key.bucket())
        );
        if !key.extra_path().is_empty() {
            object_key.push_str(key.extra_path());
            object_key.push('/');
        }
        object_key.push_str(&format!("{partition}:{start_offset}:{end_offset}:{id}.gz"));
        object_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bucket() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_object_key_layout() {
        let naming = ObjectKeyNaming::new(None, TimeBucketFormat::default());
        let id = Uuid::nil();
        let key = naming.object_key("events", 2, &PartitionKey::new(bucket(), ""), 0, 3, id);
        assert_eq!(
            key,
            "category=events/year=2024/month=03/day=05/hour=14/2:0:3:00000000-0000-0000-0000-000000000000.gz"
        );
    }

    #[test]
    fn test_object_key_with_extra_path() {
        let naming = ObjectKeyNaming::new(None, TimeBucketFormat::parse("dt=%Y%m%d").unwrap());
        let key = naming.object_key(
            "events",
            0,
            &PartitionKey::new(bucket(), "/web/eu/"),
            7,
            8,
            Uuid::nil(),
        );
        assert!(key.starts_with("category=events/dt=20240305/web/eu/0:7:8:"));
    }

    #[test]
    fn test_topic_prefix_stripped() {
        let naming = ObjectKeyNaming::new(Some("prod.".to_string()), TimeBucketFormat::default());
        assert_eq!(naming.category("prod.events"), "events");
        assert_eq!(naming.category("staging.events"), "staging.events");
        assert_eq!(naming.category("prod."), "prod.");
    }

    #[test]
    fn test_object_keys_are_unique() {
        let naming = ObjectKeyNaming::new(None, TimeBucketFormat::default());
        let key = PartitionKey::new(bucket(), "");
        let a = naming.object_key("events", 0, &key, 0, 1, Uuid::new_v4());
        let b = naming.object_key("events", 0, &key, 0, 1, Uuid::new_v4());
        assert_ne!(a, b);
    }
}
