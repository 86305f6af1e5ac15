//! Checkpointed log consumer
//!
//! `LogConsumer` is the host-facing source. The host drives it through a
//! fixed lifecycle:
//!
//! 1. `initialize_state` - hand over union state, reconciling it on restore
//! 2. `run` - subscribe owned shards and pull until cancelled
//! 3. `snapshot_state` / `notify_checkpoint_complete` - at every checkpoint
//! 4. `cancel` / `close` - stop pulling
//!
//! Snapshots may be taken before `run` started the fetcher; they are then
//! derived from the restored cursors.

mod source;

pub use source::LogConsumer;

#[cfg(test)]
mod tests;
