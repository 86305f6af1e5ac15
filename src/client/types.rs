//! Log client trait and wire types

use crate::error::Result;
use crate::record::{RawLog, RawLogGroupList};
use crate::shard::{ShardId, ShardMeta};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Position used to look up a shard cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPosition {
    /// Oldest retained record
    Begin,
    /// Next record to be written
    End,
    /// First record received at or after a unix timestamp (seconds)
    At(u32),
}

impl CursorPosition {
    /// Value of the `from` query parameter
    pub fn as_query(&self) -> String {
        match self {
            Self::Begin => "begin".to_string(),
            Self::End => "end".to_string(),
            Self::At(ts) => ts.to_string(),
        }
    }
}

impl fmt::Display for CursorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_query())
    }
}

/// Result of pulling logs from one shard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResult {
    /// Pulled log groups
    #[serde(flatten)]
    pub groups: RawLogGroupList,

    /// Cursor to resume from after these groups
    pub next_cursor: String,
}

impl PullResult {
    /// Whether the pull returned nothing
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// A batch of logs to write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutLogsRequest {
    /// Topic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Shard hash key; the service routes by it when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_key: Option<String>,

    /// Group-level tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Logs
    pub logs: Vec<RawLog>,
}

impl PutLogsRequest {
    /// Approximate payload size
    pub fn approximate_size(&self) -> usize {
        self.logs.iter().map(RawLog::approximate_size).sum()
    }
}

/// Client for the remote log service
///
/// Implementations must be safe to share between shard loops.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// List the shards of a logstore
    async fn list_shards(&self, project: &str, logstore: &str) -> Result<Vec<ShardMeta>>;

    /// Create a consumer group; succeeds when it already exists
    async fn create_consumer_group(&self, project: &str, logstore: &str, group: &str)
        -> Result<()>;

    /// Store the consumer group checkpoint of one shard
    async fn update_checkpoint(
        &self,
        project: &str,
        logstore: &str,
        group: &str,
        shard_id: ShardId,
        cursor: &str,
    ) -> Result<()>;

    /// Read the consumer group checkpoint of one shard
    async fn fetch_checkpoint(
        &self,
        project: &str,
        logstore: &str,
        group: &str,
        shard_id: ShardId,
    ) -> Result<Option<String>>;

    /// Resolve a position to a cursor
    async fn get_cursor(
        &self,
        project: &str,
        logstore: &str,
        shard_id: ShardId,
        position: CursorPosition,
    ) -> Result<String>;

    /// Pull up to `max_groups` log groups starting at `cursor`
    async fn pull_logs(
        &self,
        project: &str,
        logstore: &str,
        shard_id: ShardId,
        cursor: &str,
        max_groups: u32,
    ) -> Result<PullResult>;

    /// Write a batch of logs
    async fn put_logs(&self, project: &str, logstore: &str, request: &PutLogsRequest) -> Result<()>;
}
