//! Shard model and ownership
//!
//! A logstore is divided into shards. Each shard is consumed by exactly one
//! worker, chosen by a deterministic ownership rule that every worker
//! evaluates on its own.
//!
//! # Overview
//!
//! - `ShardMeta` - Immutable shard descriptor, identified by shard id
//! - `ShardState` - A shard together with its last known cursor
//! - `owns` / `WorkerContext` - The ownership rule

mod ownership;
mod types;

pub use ownership::{owns, WorkerContext};
pub use types::{ShardId, ShardMeta, ShardState, ShardStatus};
