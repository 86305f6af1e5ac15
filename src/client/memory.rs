//! In-memory log service
//!
//! A process-local `LogClient` for one logstore. Cursors are decimal group
//! offsets. Every consumer group push is recorded so callers can observe
//! when checkpoints reached the "remote" store, and failures can be injected
//! for the best-effort paths.

use super::types::{CursorPosition, LogClient, PullResult, PutLogsRequest};
use crate::error::{Error, Result};
use crate::record::{RawLogGroup, RawLogGroupList};
use crate::shard::{ShardId, ShardMeta, ShardStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One consumer group checkpoint push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointUpdate {
    /// Consumer group
    pub group: String,
    /// Shard
    pub shard_id: ShardId,
    /// Pushed cursor
    pub cursor: String,
}

#[derive(Debug, Default)]
struct MemoryShard {
    meta: Option<ShardMeta>,
    groups: Vec<RawLogGroup>,
    /// Receive time of each group (unix seconds)
    received_at: Vec<u32>,
}

#[derive(Debug, Default)]
struct MemoryLog {
    shards: BTreeMap<ShardId, MemoryShard>,
    consumer_groups: HashSet<String>,
    checkpoints: HashMap<(String, ShardId), String>,
    updates: Vec<CheckpointUpdate>,
    next_shard: usize,
}

/// Process-local `LogClient`
#[derive(Debug, Default)]
pub struct InMemoryLogClient {
    log: Mutex<MemoryLog>,
    fail_list_shards: AtomicBool,
    fail_update_checkpoint: AtomicBool,
    list_shards_calls: AtomicUsize,
}

impl InMemoryLogClient {
    /// Create an empty log service
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log service with shards `0..count`
    pub fn with_shards(count: u32) -> Self {
        let client = Self::new();
        for shard_id in 0..count {
            client.add_shard(ShardMeta::new(shard_id));
        }
        client
    }

    /// Add (or replace the meta of) a shard
    pub fn add_shard(&self, meta: ShardMeta) {
        let shard_id = meta.shard_id;
        self.log.lock().shards.entry(shard_id).or_default().meta = Some(meta);
    }

    /// Delete a shard and its data
    pub fn remove_shard(&self, shard_id: ShardId) {
        self.log.lock().shards.remove(&shard_id);
    }

    /// Append a log group to a shard, received at `received_at`
    pub fn append(&self, shard_id: ShardId, group: RawLogGroup, received_at: u32) -> Result<()> {
        let mut log = self.log.lock();
        let shard = live_shard(&mut log, shard_id)?;
        shard.groups.push(group);
        shard.received_at.push(received_at);
        Ok(())
    }

    /// Log groups currently stored in a shard
    pub fn groups(&self, shard_id: ShardId) -> Vec<RawLogGroup> {
        self.log
            .lock()
            .shards
            .get(&shard_id)
            .map(|s| s.groups.clone())
            .unwrap_or_default()
    }

    /// Make `list_shards` fail (or succeed again)
    pub fn set_fail_list_shards(&self, fail: bool) {
        self.fail_list_shards.store(fail, Ordering::SeqCst);
    }

    /// Make `update_checkpoint` fail (or succeed again)
    pub fn set_fail_update_checkpoint(&self, fail: bool) {
        self.fail_update_checkpoint.store(fail, Ordering::SeqCst);
    }

    /// Every successful consumer group push, in order
    pub fn checkpoint_updates(&self) -> Vec<CheckpointUpdate> {
        self.log.lock().updates.clone()
    }

    /// Current consumer group checkpoint of a shard
    pub fn checkpoint(&self, group: &str, shard_id: ShardId) -> Option<String> {
        self.log
            .lock()
            .checkpoints
            .get(&(group.to_string(), shard_id))
            .cloned()
    }

    /// Whether a consumer group exists
    pub fn has_consumer_group(&self, group: &str) -> bool {
        self.log.lock().consumer_groups.contains(group)
    }

    /// Number of `list_shards` calls so far
    pub fn list_shards_calls(&self) -> usize {
        self.list_shards_calls.load(Ordering::SeqCst)
    }
}

fn live_shard(log: &mut MemoryLog, shard_id: ShardId) -> Result<&mut MemoryShard> {
    log.shards
        .get_mut(&shard_id)
        .ok_or_else(|| Error::ShardNotFound {
            logstore: "memory".to_string(),
            shard_id,
        })
}

fn parse_offset(shard_id: ShardId, cursor: &str) -> Result<usize> {
    cursor.parse().map_err(|_| Error::InvalidCursor {
        shard_id,
        cursor: cursor.to_string(),
    })
}

#[async_trait]
impl LogClient for InMemoryLogClient {
    async fn list_shards(&self, _project: &str, _logstore: &str) -> Result<Vec<ShardMeta>> {
        self.list_shards_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list_shards.load(Ordering::SeqCst) {
            return Err(Error::http_status(503, "shard listing unavailable"));
        }
        let log = self.log.lock();
        Ok(log
            .shards
            .iter()
            .map(|(id, shard)| shard.meta.clone().unwrap_or_else(|| ShardMeta::new(*id)))
            .collect())
    }

    async fn create_consumer_group(
        &self,
        _project: &str,
        _logstore: &str,
        group: &str,
    ) -> Result<()> {
        self.log.lock().consumer_groups.insert(group.to_string());
        Ok(())
    }

    async fn update_checkpoint(
        &self,
        _project: &str,
        _logstore: &str,
        group: &str,
        shard_id: ShardId,
        cursor: &str,
    ) -> Result<()> {
        if self.fail_update_checkpoint.load(Ordering::SeqCst) {
            return Err(Error::http_status(500, "checkpoint store unavailable"));
        }
        let mut log = self.log.lock();
        if !log.consumer_groups.contains(group) {
            return Err(Error::http_status(
                404,
                format!("consumer group {group} does not exist"),
            ));
        }
        log.checkpoints
            .insert((group.to_string(), shard_id), cursor.to_string());
        log.updates.push(CheckpointUpdate {
            group: group.to_string(),
            shard_id,
            cursor: cursor.to_string(),
        });
        Ok(())
    }

    async fn fetch_checkpoint(
        &self,
        _project: &str,
        _logstore: &str,
        group: &str,
        shard_id: ShardId,
    ) -> Result<Option<String>> {
        Ok(self.checkpoint(group, shard_id))
    }

    async fn get_cursor(
        &self,
        _project: &str,
        _logstore: &str,
        shard_id: ShardId,
        position: CursorPosition,
    ) -> Result<String> {
        let mut log = self.log.lock();
        let shard = live_shard(&mut log, shard_id)?;
        let offset = match position {
            CursorPosition::Begin => 0,
            CursorPosition::End => shard.groups.len(),
            CursorPosition::At(ts) => shard
                .received_at
                .iter()
                .position(|&t| t >= ts)
                .unwrap_or(shard.groups.len()),
        };
        Ok(offset.to_string())
    }

    async fn pull_logs(
        &self,
        _project: &str,
        _logstore: &str,
        shard_id: ShardId,
        cursor: &str,
        max_groups: u32,
    ) -> Result<PullResult> {
        let offset = parse_offset(shard_id, cursor)?;
        let mut log = self.log.lock();
        let shard = live_shard(&mut log, shard_id)?;
        let start = offset.min(shard.groups.len());
        let end = start
            .saturating_add(max_groups as usize)
            .min(shard.groups.len());
        Ok(PullResult {
            groups: RawLogGroupList::new(shard.groups[start..end].to_vec()),
            next_cursor: end.to_string(),
        })
    }

    async fn put_logs(&self, _project: &str, _logstore: &str, request: &PutLogsRequest) -> Result<()> {
        let mut log = self.log.lock();
        let writable: Vec<ShardId> = log
            .shards
            .iter()
            .filter(|(_, s)| s.meta.as_ref().map_or(true, |m| m.status == ShardStatus::ReadWrite))
            .map(|(id, _)| *id)
            .collect();
        if writable.is_empty() {
            return Err(Error::http_status(400, "no writable shard"));
        }

        let index = match &request.hash_key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % writable.len() as u64) as usize
            }
            None => {
                log.next_shard = log.next_shard.wrapping_add(1);
                log.next_shard % writable.len()
            }
        };

        let group = RawLogGroup {
            topic: request.topic.clone(),
            source: request.source.clone(),
            tags: request.tags.clone(),
            logs: request.logs.clone(),
        };
        let received_at = request.logs.iter().map(|l| l.time).max().unwrap_or(0);
        let shard = live_shard(&mut log, writable[index])?;
        shard.groups.push(group);
        shard.received_at.push(received_at);
        Ok(())
    }
}
