//! Shard types
//!
//! `ShardMeta` is persisted inside union checkpoint state, so it is
//! serializable and must stay backward compatible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stream-scoped shard identifier
pub type ShardId = u32;

/// Read/write status of a shard as reported by the log service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    /// Shard accepts writes
    #[default]
    ReadWrite,
    /// Shard was split or merged and only serves reads
    ReadOnly,
}

/// Immutable descriptor of one shard
///
/// Equality and hashing only look at `shard_id`. Descriptive fields may
/// differ between two metas for the same shard (for example a meta restored
/// from an old checkpoint) and they still compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMeta {
    /// Shard id
    pub shard_id: ShardId,

    /// Shard status
    #[serde(default)]
    pub status: ShardStatus,

    /// Inclusive lower bound of the hash key range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_key: Option<String>,

    /// Exclusive upper bound of the hash key range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_key: Option<String>,

    /// Creation time (unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl ShardMeta {
    /// Create a meta with only an id
    pub fn new(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            status: ShardStatus::ReadWrite,
            begin_key: None,
            end_key: None,
            created_at: None,
        }
    }

    /// Set the hash key range
    #[must_use]
    pub fn with_key_range(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.begin_key = Some(begin.into());
        self.end_key = Some(end.into());
        self
    }

    /// Set the status
    #[must_use]
    pub fn with_status(mut self, status: ShardStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the creation time
    #[must_use]
    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Whether the shard only serves reads
    pub fn is_read_only(&self) -> bool {
        self.status == ShardStatus::ReadOnly
    }
}

impl PartialEq for ShardMeta {
    fn eq(&self, other: &Self) -> bool {
        self.shard_id == other.shard_id
    }
}

impl Eq for ShardMeta {}

impl Hash for ShardMeta {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shard_id.hash(state);
    }
}

impl fmt::Display for ShardMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.shard_id)
    }
}

/// A subscribed shard and its last known cursor
///
/// `cursor` stays `None` until the first record is consumed or a restored
/// checkpoint supplies one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardState {
    /// The shard
    pub meta: ShardMeta,
    /// Last consumed cursor
    pub cursor: Option<String>,
}

impl ShardState {
    /// Create a shard state
    pub fn new(meta: ShardMeta, cursor: Option<String>) -> Self {
        Self { meta, cursor }
    }

    /// Shard id shortcut
    pub fn shard_id(&self) -> ShardId {
        self.meta.shard_id
    }
}
