//! Shard ownership
//!
//! Every worker evaluates the same rule independently; no coordination is
//! involved. The rule is used for live subscription, for filtering restored
//! union state and for snapshots taken before the fetcher starts. All three
//! call sites go through `owns`.

use super::types::{ShardId, ShardMeta};
use crate::error::{Error, Result};

/// Whether worker `worker_index` of `worker_count` owns `shard_id`.
///
/// A worker count of zero owns nothing.
#[inline]
pub fn owns(shard_id: ShardId, worker_count: u32, worker_index: u32) -> bool {
    worker_count > 0 && shard_id % worker_count == worker_index
}

/// Position of this worker in the fleet
///
/// The host guarantees `(worker_count, worker_index)` is consistent across
/// all workers of one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    worker_count: u32,
    worker_index: u32,
}

impl WorkerContext {
    /// Create a worker context
    pub fn new(worker_count: u32, worker_index: u32) -> Result<Self> {
        if worker_count == 0 {
            return Err(Error::invalid_value("worker_count", "must be at least 1"));
        }
        if worker_index >= worker_count {
            return Err(Error::invalid_value(
                "worker_index",
                format!("{worker_index} is out of range for {worker_count} workers"),
            ));
        }
        Ok(Self {
            worker_count,
            worker_index,
        })
    }

    /// Context for a single, non-parallel worker
    pub fn single() -> Self {
        Self {
            worker_count: 1,
            worker_index: 0,
        }
    }

    /// Number of workers
    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    /// Index of this worker
    pub fn worker_index(&self) -> u32 {
        self.worker_index
    }

    /// Whether this worker owns the shard
    pub fn owns(&self, shard: &ShardMeta) -> bool {
        self.owns_id(shard.shard_id)
    }

    /// Whether this worker owns the shard id
    pub fn owns_id(&self, shard_id: ShardId) -> bool {
        owns(shard_id, self.worker_count, self.worker_index)
    }
}

impl Default for WorkerContext {
    fn default() -> Self {
        Self::single()
    }
}
