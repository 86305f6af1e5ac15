//! Fetcher trait and settings

use crate::config::{ConsumerConfig, StartPosition};
use crate::error::Result;
use crate::shard::{ShardMeta, ShardState};
use crate::state::CursorEntry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};

/// Lifecycle of a shard fetcher
///
/// `register_shard` may be called before and after `start`. Shards
/// registered after `start` begin pulling immediately.
#[async_trait]
pub trait ShardFetcher: Send + Sync {
    /// List shards that this worker owns and has not registered yet
    async fn discover_new_shards(&self) -> Result<Vec<ShardMeta>>;

    /// Subscribe a shard, resuming from its cursor when present
    fn register_shard(&self, state: ShardState);

    /// Start the pull loops
    async fn start(&self) -> Result<()>;

    /// Ask every loop to stop; does not wait
    fn request_stop(&self);

    /// Wait until stop was requested and every loop ended.
    ///
    /// Returns the first fatal loop error, if any.
    async fn await_stopped(&self) -> Result<()>;

    /// Cursor of every subscribed shard, ordered by shard id
    fn current_cursors(&self) -> Vec<CursorEntry>;

    /// Whether `start` was called
    fn is_started(&self) -> bool;
}

/// Pull loop tuning
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    /// Project
    pub project: String,
    /// Logstore
    pub logstore: String,
    /// Start position for shards without a cursor
    pub start_position: StartPosition,
    /// Sleep after an empty pull
    pub fetch_interval: Duration,
    /// Maximum groups per pull
    pub max_groups_per_fetch: u32,
    /// Discovery interval while running; `None` disables discovery
    pub discovery_interval: Option<Duration>,
    /// Upper bound for joining loops after a stop request
    pub shutdown_timeout: Duration,
    /// Backoff after a failed pull
    pub error_backoff: Duration,
}

impl FetcherSettings {
    /// Settings from a consumer config
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            project: config.project().to_string(),
            logstore: config.logstore().to_string(),
            start_position: config.start_position,
            fetch_interval: config.fetch_interval(),
            max_groups_per_fetch: config.max_groups_per_fetch,
            discovery_interval: config.discovery_interval(),
            shutdown_timeout: config.shutdown_timeout(),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Barrier between pull loops and the host.
///
/// A loop holds the read side from handing a batch to the sink until the
/// batch's cursor is recorded. While an `OutputPause` is held no loop can
/// hand over output, so the host can drain its channel and take a snapshot
/// that matches exactly what it received.
#[derive(Debug, Clone, Default)]
pub struct OutputGate {
    lock: Arc<RwLock<()>>,
}

impl OutputGate {
    /// Create an open gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for in-flight handovers to finish and block new ones
    pub async fn pause(&self) -> OutputPause {
        OutputPause {
            _guard: Arc::clone(&self.lock).write_owned().await,
        }
    }

    pub(crate) async fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }
}

/// Held pause of an `OutputGate`; pull loops resume once dropped
#[must_use = "output resumes as soon as the pause is dropped"]
#[derive(Debug)]
pub struct OutputPause {
    _guard: OwnedRwLockWriteGuard<()>,
}
