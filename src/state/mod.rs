//! Union checkpoint state
//!
//! Checkpointed cursors are stored as *union* state: every worker writes its
//! own entries, and on restore every worker reads the entries of all
//! workers. Ownership is never persisted; it is re-derived from the current
//! parallelism when the state is restored.
//!
//! # Overview
//!
//! - `CursorEntry` - One `(shard, cursor)` pair
//! - `UnionState` - The container trait the checkpoint coordinator writes to
//! - `MemoryUnionState` - Shared in-process container with per-worker views
//! - `FileUnionState` - JSON file container with atomic writes

mod file;
mod memory;
mod types;

pub use file::FileUnionState;
pub use memory::MemoryUnionState;
pub use types::{CursorEntry, UnionState, UnionStateFile, WriterSection};
