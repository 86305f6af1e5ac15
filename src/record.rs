//! Log record types
//!
//! A log is a timestamped set of key/value contents. Logs travel in groups
//! that share a topic, a source and a set of tags. These are the units read
//! from a shard and written by the producer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single log entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Log time (unix seconds)
    pub time: u32,

    /// Key/value contents
    #[serde(default)]
    pub contents: BTreeMap<String, String>,
}

impl RawLog {
    /// Create an empty log at the given time
    pub fn new(time: u32) -> Self {
        Self {
            time,
            contents: BTreeMap::new(),
        }
    }

    /// Add a content field
    #[must_use]
    pub fn with_content(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.contents.insert(key.into(), value.into());
        self
    }

    /// Get a content field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.contents.get(key).map(String::as_str)
    }

    /// Approximate encoded size, used for batching limits
    pub fn approximate_size(&self) -> usize {
        4 + self
            .contents
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
    }
}

/// A group of logs sharing topic, source and tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogGroup {
    /// Topic
    #[serde(default)]
    pub topic: Option<String>,

    /// Source (usually a host address)
    #[serde(default)]
    pub source: Option<String>,

    /// Group-level tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Logs
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

impl RawLogGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the topic
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the source
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Append a log
    #[must_use]
    pub fn with_log(mut self, log: RawLog) -> Self {
        self.logs.push(log);
        self
    }

    /// Number of logs
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    /// Whether the group has no logs
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// The log groups returned by one pull from one shard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogGroupList {
    /// Groups in shard order
    #[serde(default)]
    pub groups: Vec<RawLogGroup>,
}

impl RawLogGroupList {
    /// Create a list
    pub fn new(groups: Vec<RawLogGroup>) -> Self {
        Self { groups }
    }

    /// Total number of logs across all groups
    pub fn log_count(&self) -> usize {
        self.groups.iter().map(RawLogGroup::len).sum()
    }

    /// Whether there are no groups
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
