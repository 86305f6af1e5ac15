//! Batching log producer
//!
//! `LogProducer` is the host-facing sink. Elements are serialized into log
//! groups, routed by an optional partitioner and handed to a
//! `RecordSender`, which batches them per `(topic, source, hash key, tags)`
//! and writes the batches in the background.
//!
//! # Overview
//!
//! - `LogProducer` - Sink lifecycle: `open`, `invoke`, `snapshot_state`, `close`
//! - `RecordSender` / `BatchingSender` - Background batching and sending
//! - `LogPartitioner` - Picks the shard hash key of an element
//! - `CallbackFactory` / `SendCallback` - Per-send completion hooks

mod callback;
mod sender;
mod sink;

pub use callback::{CallbackFactory, LoggingCallbackFactory, SendCallback, SendContext};
pub use sender::{BatchingSender, RecordSender};
pub use sink::{LogPartitioner, LogProducer};

#[cfg(test)]
mod tests;
