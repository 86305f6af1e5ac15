//! Snapshot coordination

use super::reconcile::RestoredCursors;
use super::sync::CheckpointSync;
use crate::config::CheckpointMode;
use crate::error::{Error, Result};
use crate::fetcher::ShardFetcher;
use crate::shard::WorkerContext;
use crate::state::{CursorEntry, UnionState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Phase of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorPhase {
    /// No snapshot in progress
    #[default]
    Idle,
    /// Writing union state
    Snapshotting,
}

/// Where snapshot entries come from
pub enum SnapshotSource<'a> {
    /// The ledger of a started fetcher
    Fetcher(&'a dyn ShardFetcher),
    /// The restore set, when the fetcher has not started yet
    Restored(Option<&'a RestoredCursors>),
}

impl<'a> SnapshotSource<'a> {
    /// Pick the source for the current lifecycle stage
    pub fn select(
        fetcher: Option<&'a dyn ShardFetcher>,
        restored: Option<&'a RestoredCursors>,
    ) -> Self {
        match fetcher {
            Some(fetcher) if fetcher.is_started() => Self::Fetcher(fetcher),
            _ => Self::Restored(restored),
        }
    }
}

/// Outcome of one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Host checkpoint id
    pub checkpoint_id: u64,
    /// Entries written to union state
    pub entries: Vec<CursorEntry>,
    /// Cursors pushed to the consumer group
    pub pushed: usize,
    /// Cursors whose push failed
    pub push_failures: usize,
}

/// Writes this worker's cursors into union state at host checkpoints
#[derive(Debug)]
pub struct CheckpointCoordinator {
    ctx: WorkerContext,
    sync: CheckpointSync,
    phase: Mutex<CoordinatorPhase>,
    last_completed: AtomicU64,
}

/// Resets the phase when a snapshot ends, including on error
struct PhaseGuard<'a>(&'a Mutex<CoordinatorPhase>);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = CoordinatorPhase::Idle;
    }
}

impl CheckpointCoordinator {
    /// Create a coordinator for one worker
    pub fn new(ctx: WorkerContext, sync: CheckpointSync) -> Self {
        Self {
            ctx,
            sync,
            phase: Mutex::new(CoordinatorPhase::Idle),
            last_completed: AtomicU64::new(0),
        }
    }

    /// Current phase
    pub fn phase(&self) -> CoordinatorPhase {
        *self.phase.lock()
    }

    /// Id of the last checkpoint the host confirmed, 0 when none
    pub fn last_completed(&self) -> u64 {
        self.last_completed.load(Ordering::SeqCst)
    }

    /// Replace this worker's union state entries with the current cursors.
    ///
    /// Entries without a cursor are written too. In `OnCheckpoint` mode the
    /// cursors are then pushed to the consumer group, best effort.
    pub async fn snapshot(
        &self,
        checkpoint_id: u64,
        source: SnapshotSource<'_>,
        state: &dyn UnionState,
    ) -> Result<SnapshotReport> {
        let _guard = self.enter()?;

        let entries = match source {
            SnapshotSource::Fetcher(fetcher) => fetcher.current_cursors(),
            SnapshotSource::Restored(Some(restored)) => restored.owned_by(&self.ctx),
            SnapshotSource::Restored(None) => Vec::new(),
        };

        state.clear().await?;
        state
            .stamp(checkpoint_id, self.ctx.worker_count())
            .await?;
        for entry in &entries {
            state.add(entry.clone()).await?;
        }
        state.persist().await?;

        let mut report = SnapshotReport {
            checkpoint_id,
            entries,
            ..SnapshotReport::default()
        };

        if self.sync.mode() == CheckpointMode::OnCheckpoint && self.sync.is_enabled() {
            let (pushed, failed) = self.sync.push_all(&report.entries).await;
            report.pushed = pushed;
            report.push_failures = failed;
        }

        debug!(
            checkpoint_id,
            entries = report.entries.len(),
            pushed = report.pushed,
            failures = report.push_failures,
            "Snapshot written"
        );
        Ok(report)
    }

    /// Record that the host confirmed a checkpoint
    pub fn notify_checkpoint_complete(&self, checkpoint_id: u64) {
        self.last_completed.fetch_max(checkpoint_id, Ordering::SeqCst);
        info!("Checkpoint {} complete", checkpoint_id);
    }

    fn enter(&self) -> Result<PhaseGuard<'_>> {
        let mut phase = self.phase.lock();
        if *phase == CoordinatorPhase::Snapshotting {
            return Err(Error::checkpoint("a snapshot is already in progress"));
        }
        *phase = CoordinatorPhase::Snapshotting;
        Ok(PhaseGuard(&self.phase))
    }
}
