// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Logstore Connector
//!
//! Distributed, checkpointed consumer and batching producer for sharded
//! logstores.
//!
//! ## Features
//!
//! - **Deterministic Shard Ownership**: Every worker derives its shards from `(count, index)`
//! - **Union Checkpoints**: Cursors survive restarts and changes of parallelism
//! - **Consumer Group Sync**: Cursors mirrored to the service, on checkpoint or immediately
//! - **Shard Discovery**: New shards picked up while running, deleted shards dropped
//! - **Batching Producer**: Count, size and time bounded batches with a memory pool
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use logstore_connector::{
//!     codec::JsonLogDeserializer, config::ConsumerConfig, consumer::LogConsumer,
//!     shard::WorkerContext, state::FileUnionState, Result,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ConsumerConfig::from_file("consumer.yaml")?;
//!     let ctx = WorkerContext::new(2, 0)?;
//!     let consumer = Arc::new(LogConsumer::new(JsonLogDeserializer, config, ctx)?);
//!
//!     let state = FileUnionState::open("state.json", ctx.worker_index()).await?;
//!     let restored = state.was_restored();
//!     consumer.initialize_state(Arc::new(state), restored).await?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//!     tokio::spawn({
//!         let consumer = Arc::clone(&consumer);
//!         async move { consumer.run(tx).await }
//!     });
//!
//!     while let Some(records) = rx.recv().await {
//!         // Process records, snapshot periodically
//!         consumer.snapshot_state(1).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │          LogConsumer                       LogProducer            │
//! │  initialize_state  run  snapshot_state     open  invoke  close    │
//! └───────────────────────────────────────────────────────────────────┘
//!          │                 │                        │
//! ┌────────┴───────┬─────────┴────────┬───────────────┴──────────────┐
//! │   Checkpoint   │     Fetcher      │   Producer                   │
//! ├────────────────┼──────────────────┼──────────────────────────────┤
//! │ Coordinator    │ Shard loops      │ BatchingSender               │
//! │ Reconciler     │ Discovery        │ Partitioner                  │
//! │ Sync           │ CursorLedger     │ Callbacks                    │
//! └────────────────┴──────────────────┴──────────────────────────────┘
//!          │                 │                        │
//! ┌────────┴───────┐ ┌───────┴──────────────────────────┴─────────────┐
//! │ UnionState     │ │ LogClient (HTTP, in-memory)                     │
//! └────────────────┘ └─────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Consumer and producer configuration
pub mod config;

/// Shard model and ownership
pub mod shard;

/// Log records
pub mod record;

/// Log service client
pub mod client;

/// Shard → cursor ledger
pub mod ledger;

/// Union checkpoint state
pub mod state;

/// Record codecs
pub mod codec;

/// Checkpoint coordination
pub mod checkpoint;

/// Shard fetching
pub mod fetcher;

/// Checkpointed consumer
pub mod consumer;

/// Batching producer
pub mod producer;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};

// Re-export commonly used types
pub use config::{CheckpointMode, ConsumerConfig, ProducerConfig, StartPosition};
pub use consumer::LogConsumer;
pub use producer::LogProducer;
pub use shard::{ShardMeta, WorkerContext};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
