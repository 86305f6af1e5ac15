//! Built-in codecs

use super::types::{LogDeserializer, LogSerializer};
use crate::error::{Error, Result};
use crate::record::{RawLog, RawLogGroup, RawLogGroupList};
use crate::shard::ShardMeta;
use chrono::Utc;
use serde_json::{Map, Value};

// ============================================================================
// Raw Passthrough
// ============================================================================

/// Emits pulled groups unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLogGroupListDeserializer;

impl LogDeserializer for RawLogGroupListDeserializer {
    type Output = RawLogGroupList;

    fn deserialize(&self, _shard: &ShardMeta, groups: RawLogGroupList) -> Result<Option<Self::Output>> {
        Ok((!groups.is_empty()).then_some(groups))
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Flattens every log into a JSON object
///
/// Contents become string fields. Metadata goes into reserved fields:
/// `__time__`, `__topic__`, `__source__`, `__shard__` and `__tag__:<key>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLogDeserializer;

impl LogDeserializer for JsonLogDeserializer {
    type Output = Vec<Value>;

    fn deserialize(&self, shard: &ShardMeta, groups: RawLogGroupList) -> Result<Option<Self::Output>> {
        let mut out = Vec::with_capacity(groups.log_count());
        for group in groups.groups {
            for log in group.logs {
                let mut obj = Map::new();
                obj.insert("__time__".to_string(), Value::from(log.time));
                obj.insert("__shard__".to_string(), Value::from(shard.shard_id));
                if let Some(topic) = &group.topic {
                    obj.insert("__topic__".to_string(), Value::from(topic.as_str()));
                }
                if let Some(source) = &group.source {
                    obj.insert("__source__".to_string(), Value::from(source.as_str()));
                }
                for (key, value) in &group.tags {
                    obj.insert(format!("__tag__:{key}"), Value::from(value.as_str()));
                }
                for (key, value) in log.contents {
                    obj.insert(key, Value::String(value));
                }
                out.push(Value::Object(obj));
            }
        }
        Ok((!out.is_empty()).then_some(out))
    }
}

/// Writes a JSON object as a single log
///
/// Scalar fields are stringified, nested values are written as JSON text.
/// `time_field`, when set and numeric, becomes the log time; otherwise the
/// current time is used. Non-object values are rejected.
#[derive(Debug, Clone, Default)]
pub struct JsonLogSerializer {
    topic: Option<String>,
    source: Option<String>,
    time_field: Option<String>,
}

impl JsonLogSerializer {
    /// Create a serializer
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the topic of every group
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the source of every group
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Read the log time from a field
    #[must_use]
    pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = Some(field.into());
        self
    }
}

impl LogSerializer<Value> for JsonLogSerializer {
    fn serialize(&self, value: &Value) -> Result<Option<RawLogGroup>> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Other(format!("expected a JSON object, got {value}")))?;
        if obj.is_empty() {
            return Ok(None);
        }

        let time = self
            .time_field
            .as_deref()
            .and_then(|field| obj.get(field))
            .and_then(Value::as_u64)
            .map_or_else(|| Utc::now().timestamp() as u32, |t| t as u32);

        let mut log = RawLog::new(time);
        for (key, field) in obj {
            if self.time_field.as_deref() == Some(key.as_str()) {
                continue;
            }
            let text = match field {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            log.contents.insert(key.clone(), text);
        }

        Ok(Some(RawLogGroup {
            topic: self.topic.clone(),
            source: self.source.clone(),
            tags: Default::default(),
            logs: vec![log],
        }))
    }
}
