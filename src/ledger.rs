//! Cursor ledger
//!
//! In-memory map from subscribed shard to its last consumed cursor, shared
//! by every shard loop of one worker and read by the checkpoint coordinator.
//!
//! Each shard has its own slot, so loops of different shards update their
//! cursors in parallel under the shared map lock. `snapshot` takes the map
//! lock exclusively for the duration of the copy only, which excludes
//! in-flight updates and yields a consistent view across shards.

use crate::error::{Error, Result};
use crate::shard::{ShardId, ShardMeta};
use crate::state::CursorEntry;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type Slot = Arc<Mutex<Option<String>>>;

/// Shard → cursor map with per-shard slots
#[derive(Debug, Default)]
pub struct CursorLedger {
    slots: RwLock<HashMap<ShardMeta, Slot>>,
}

impl CursorLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscribed shard with its starting cursor.
    ///
    /// Returns `false` and leaves the existing cursor alone when the shard is
    /// already registered.
    pub fn register(&self, shard: ShardMeta, cursor: Option<String>) -> bool {
        let mut slots = self.slots.write();
        if slots.contains_key(&shard) {
            return false;
        }
        slots.insert(shard, Arc::new(Mutex::new(cursor)));
        true
    }

    /// Set the cursor of a registered shard
    pub fn record_cursor(&self, shard: &ShardMeta, token: impl Into<String>) -> Result<()> {
        let slots = self.slots.read();
        let slot = slots.get(shard).ok_or(Error::UnknownShard {
            shard_id: shard.shard_id,
        })?;
        *slot.lock() = Some(token.into());
        Ok(())
    }

    /// Copy of every entry, ordered by shard id.
    ///
    /// Entries without a cursor are included.
    pub fn snapshot(&self) -> Vec<CursorEntry> {
        let slots = self.slots.write();
        let mut entries: Vec<CursorEntry> = slots
            .iter()
            .map(|(shard, slot)| CursorEntry::new(shard.clone(), slot.lock().clone()))
            .collect();
        drop(slots);
        entries.sort_by_key(|e| e.shard.shard_id);
        entries
    }

    /// Drop a shard confirmed deleted upstream. Idempotent.
    pub fn remove_shard(&self, shard: &ShardMeta) -> bool {
        self.slots.write().remove(shard).is_some()
    }

    /// Current cursor of a shard; `None` when unregistered or not yet set
    pub fn cursor(&self, shard_id: ShardId) -> Option<String> {
        let slots = self.slots.read();
        slots
            .get(&ShardMeta::new(shard_id))
            .and_then(|slot| slot.lock().clone())
    }

    /// Whether a shard is registered
    pub fn contains(&self, shard_id: ShardId) -> bool {
        self.slots.read().contains_key(&ShardMeta::new(shard_id))
    }

    /// Registered shards, ordered by id
    pub fn shards(&self) -> Vec<ShardMeta> {
        let mut shards: Vec<ShardMeta> = self.slots.read().keys().cloned().collect();
        shards.sort_by_key(|s| s.shard_id);
        shards
    }

    /// Number of registered shards
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no shard is registered
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}
