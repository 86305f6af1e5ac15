//! Checkpoint coordination
//!
//! Turns the cursor ledger into union state at host checkpoints, rebuilds
//! resume positions from union state after a restart, and mirrors cursors
//! to the consumer group on the log service.
//!
//! # Overview
//!
//! - `CheckpointSync` - Consumer group pushes, gated by `CheckpointMode`
//! - `RestoreReconciler` - Union state → `RestoredCursors` for this worker
//! - `CheckpointCoordinator` - Snapshot state machine

mod coordinator;
mod reconcile;
mod sync;

pub use coordinator::{CheckpointCoordinator, CoordinatorPhase, SnapshotReport, SnapshotSource};
pub use reconcile::{RestoreReconciler, RestoredCursors};
pub use sync::CheckpointSync;
