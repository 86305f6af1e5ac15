//! Union state types
//!
//! `UnionStateFile` is the on-disk format and is kept backward compatible.

use crate::error::Result;
use crate::shard::ShardMeta;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One checkpointed `(shard, cursor)` pair
///
/// A `None` cursor means the shard was subscribed but nothing was consumed
/// yet; it is kept so a restore still recognizes the shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntry {
    /// The shard
    pub shard: ShardMeta,

    /// Last consumed cursor
    #[serde(default)]
    pub cursor: Option<String>,
}

impl CursorEntry {
    /// Create an entry
    pub fn new(shard: ShardMeta, cursor: Option<String>) -> Self {
        Self { shard, cursor }
    }
}

/// Host-provided checkpoint container with union semantics
///
/// `clear`, `stamp` and `add` only touch the calling worker's entries;
/// `read_all` returns the entries of every worker of the current
/// deployment, freshest last.
#[async_trait]
pub trait UnionState: Send + Sync {
    /// Remove this worker's entries
    async fn clear(&self) -> Result<()>;

    /// Mark this worker's section as written by checkpoint `checkpoint_id`
    /// of a deployment with `worker_count` workers.
    ///
    /// Checkpoint ids must grow across restarts of a deployment.
    async fn stamp(&self, _checkpoint_id: u64, _worker_count: u32) -> Result<()> {
        Ok(())
    }

    /// Append an entry for this worker
    async fn add(&self, entry: CursorEntry) -> Result<()>;

    /// Entries written by all workers
    async fn read_all(&self) -> Result<Vec<CursorEntry>>;

    /// Make the current contents durable
    async fn persist(&self) -> Result<()> {
        Ok(())
    }
}

/// Entries written by one worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterSection {
    /// When this section was last written
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Checkpoint that wrote this section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<u64>,

    /// Worker count of the deployment that wrote this section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<u32>,

    /// Entries in write order
    #[serde(default)]
    pub entries: Vec<CursorEntry>,
}

impl WriterSection {
    /// Section with entries and no stamp
    pub fn with_entries(entries: Vec<CursorEntry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    /// Set the checkpoint stamp
    #[must_use]
    pub fn stamped(mut self, checkpoint_id: u64, worker_count: u32) -> Self {
        self.checkpoint_id = Some(checkpoint_id);
        self.worker_count = Some(worker_count);
        self
    }

    /// Ordering key; unstamped sections sort first
    fn recency(&self) -> (u64, Option<DateTime<Utc>>) {
        (self.checkpoint_id.unwrap_or(0), self.updated_at)
    }
}

/// Serialized union state, keyed by writer index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionStateFile {
    /// Per-writer sections
    #[serde(default)]
    pub writers: BTreeMap<u32, WriterSection>,
}

impl UnionStateFile {
    /// Entries of the current deployment, oldest section first.
    ///
    /// The newest section names the deployment's worker count; sections of
    /// writers at or above it were left behind by a larger deployment and
    /// are skipped. Within one shard the freshest entry comes last.
    pub fn entries(&self) -> Vec<CursorEntry> {
        let worker_count = self.worker_count();
        let mut sections: Vec<(u32, &WriterSection)> = self
            .writers
            .iter()
            .filter(|(writer, _)| worker_count.map_or(true, |count| **writer < count))
            .map(|(writer, section)| (*writer, section))
            .collect();
        sections.sort_by_key(|(writer, section)| (section.recency(), *writer));
        sections
            .into_iter()
            .flat_map(|(_, section)| section.entries.iter().cloned())
            .collect()
    }

    /// Worker count recorded by the newest stamped section
    pub fn worker_count(&self) -> Option<u32> {
        self.writers
            .values()
            .filter(|s| s.worker_count.is_some())
            .max_by_key(|s| s.recency())
            .and_then(|s| s.worker_count)
    }

    /// Drop sections of writers outside a deployment of `worker_count`
    pub fn retain_workers(&mut self, worker_count: u32) {
        self.writers.retain(|writer, _| *writer < worker_count);
    }

    /// Whether no writer has any entry
    pub fn is_empty(&self) -> bool {
        self.writers.values().all(|s| s.entries.is_empty())
    }
}
