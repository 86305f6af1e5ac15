//! Restore reconciliation
//!
//! Union state holds the entries of every worker of the previous run. Each
//! worker keeps the entries it owns under the current parallelism, drops
//! shards that no longer exist upstream and seeds the consumer group with
//! the surviving cursors.

use super::sync::CheckpointSync;
use crate::shard::{ShardId, ShardMeta, WorkerContext};
use crate::state::CursorEntry;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Resume positions of the shards this worker owns after a restore
///
/// Keyed by shard id; a `None` cursor means the shard was known but nothing
/// had been consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoredCursors {
    entries: HashMap<ShardId, CursorEntry>,
}

impl RestoredCursors {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; a later entry for the same shard replaces the earlier one
    pub fn insert(&mut self, entry: CursorEntry) -> Option<CursorEntry> {
        self.entries.insert(entry.shard.shard_id, entry)
    }

    /// Whether the shard was restored
    pub fn contains(&self, shard: &ShardMeta) -> bool {
        self.entries.contains_key(&shard.shard_id)
    }

    /// Restored cursor of a shard; `None` when unknown or never consumed
    pub fn cursor_for(&self, shard: &ShardMeta) -> Option<String> {
        self.entries
            .get(&shard.shard_id)
            .and_then(|e| e.cursor.clone())
    }

    /// All entries, ordered by shard id
    pub fn entries(&self) -> Vec<CursorEntry> {
        let mut entries: Vec<CursorEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.shard.shard_id);
        entries
    }

    /// Entries owned by `ctx`, ordered by shard id
    pub fn owned_by(&self, ctx: &WorkerContext) -> Vec<CursorEntry> {
        self.entries()
            .into_iter()
            .filter(|e| ctx.owns(&e.shard))
            .collect()
    }

    /// Number of restored shards
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was restored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<CursorEntry> for RestoredCursors {
    fn from_iter<I: IntoIterator<Item = CursorEntry>>(iter: I) -> Self {
        let mut restored = Self::new();
        for entry in iter {
            restored.insert(entry);
        }
        restored
    }
}

/// Rebuilds this worker's resume positions from union state
#[derive(Debug)]
pub struct RestoreReconciler<'a> {
    ctx: WorkerContext,
    sync: &'a CheckpointSync,
}

impl<'a> RestoreReconciler<'a> {
    /// Create a reconciler for one worker
    pub fn new(ctx: WorkerContext, sync: &'a CheckpointSync) -> Self {
        Self { ctx, sync }
    }

    /// Reconcile the entries read from union state.
    ///
    /// Never fails: a shard listing failure disables pruning and push
    /// failures are logged.
    pub async fn reconcile(&self, entries: Vec<CursorEntry>) -> RestoredCursors {
        let live = self.live_shards().await;

        let mut restored = RestoredCursors::new();
        for entry in entries {
            if !self.ctx.owns(&entry.shard) {
                continue;
            }
            if let Some(live) = &live {
                if !live.contains(&entry.shard.shard_id) {
                    warn!(
                        "Shard {} in restored state no longer exists, skipping it",
                        entry.shard.shard_id
                    );
                    continue;
                }
            }
            if let Some(previous) = restored.insert(entry) {
                debug!(
                    shard_id = previous.shard.shard_id,
                    "Duplicate restored entry, keeping the latest"
                );
            }
        }

        self.sync.push_all(&restored.entries()).await;

        info!(
            "Restored {} shard cursors for worker {}/{}",
            restored.len(),
            self.ctx.worker_index(),
            self.ctx.worker_count()
        );
        restored
    }

    async fn live_shards(&self) -> Option<HashSet<ShardId>> {
        let listing = self
            .sync
            .client()
            .list_shards(self.sync.project(), self.sync.logstore())
            .await;
        match listing {
            Ok(shards) => Some(shards.into_iter().map(|s| s.shard_id).collect()),
            Err(e) => {
                warn!("Failed to list shards, keeping all restored entries: {}", e);
                None
            }
        }
    }
}
