//! Shard fetching
//!
//! A fetcher owns one pull loop per subscribed shard. Loops hand
//! deserialized output to the host through a channel and record their
//! cursor in the shared `CursorLedger` once the output was accepted.
//!
//! # Overview
//!
//! - `ShardFetcher` - Lifecycle trait the consumer and coordinator drive
//! - `LogDataFetcher` - Tokio implementation with shard discovery
//! - `FetcherSettings` - Pull loop tuning, derived from `ConsumerConfig`
//! - `OutputGate` - Lets the host pause output handover around a checkpoint

mod supervisor;
mod types;

pub use supervisor::LogDataFetcher;
pub use types::{FetcherSettings, OutputGate, OutputPause, ShardFetcher};
