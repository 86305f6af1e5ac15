//! Consumer group checkpoint pushes

use crate::client::LogClient;
use crate::config::{CheckpointMode, ConsumerConfig};
use crate::error::{Error, Result};
use crate::shard::ShardId;
use crate::state::CursorEntry;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Pushes cursors to the consumer group of the log service
///
/// Every push is bounded by the configured timeout. Pushes are disabled
/// when no consumer group is configured.
#[derive(Clone)]
pub struct CheckpointSync {
    client: Arc<dyn LogClient>,
    project: String,
    logstore: String,
    consumer_group: Option<String>,
    mode: CheckpointMode,
    timeout: Duration,
}

impl CheckpointSync {
    /// Create a sync for the logstore and consumer group of `config`
    pub fn new(client: Arc<dyn LogClient>, config: &ConsumerConfig) -> Self {
        Self {
            client,
            project: config.project().to_string(),
            logstore: config.logstore().to_string(),
            consumer_group: config.consumer_group.clone(),
            mode: config.checkpoint_mode,
            timeout: config.checkpoint_push_timeout(),
        }
    }

    /// Project
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Logstore
    pub fn logstore(&self) -> &str {
        &self.logstore
    }

    /// Checkpoint mode
    pub fn mode(&self) -> CheckpointMode {
        self.mode
    }

    /// Configured consumer group
    pub fn consumer_group(&self) -> Option<&str> {
        self.consumer_group.as_deref()
    }

    /// Whether a consumer group is configured
    pub fn is_enabled(&self) -> bool {
        self.consumer_group.is_some()
    }

    /// Client used for pushes
    pub fn client(&self) -> &Arc<dyn LogClient> {
        &self.client
    }

    /// Push one cursor.
    ///
    /// Returns `Ok(false)` without contacting the service when no consumer
    /// group is configured.
    pub async fn push(&self, shard_id: ShardId, cursor: &str) -> Result<bool> {
        let Some(group) = self.consumer_group.as_deref() else {
            return Ok(false);
        };

        let update = self
            .client
            .update_checkpoint(&self.project, &self.logstore, group, shard_id, cursor);
        match tokio::time::timeout(self.timeout, update).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Err(Error::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Push one cursor, logging and swallowing failures.
    ///
    /// Returns whether the cursor reached the service.
    pub async fn push_best_effort(&self, shard_id: ShardId, cursor: &str) -> bool {
        match self.push(shard_id, cursor).await {
            Ok(pushed) => {
                if pushed {
                    debug!(shard_id, cursor, "Pushed consumer group checkpoint");
                }
                pushed
            }
            Err(e) => {
                warn!(
                    "Failed to push checkpoint of shard {} to consumer group {:?}: {}",
                    shard_id, self.consumer_group, e
                );
                false
            }
        }
    }

    /// Push every entry that has a cursor, concurrently.
    ///
    /// Returns `(pushed, failed)`.
    pub async fn push_all(&self, entries: &[CursorEntry]) -> (usize, usize) {
        let outcomes = join_all(entries.iter().filter_map(|entry| {
            let cursor = entry.cursor.as_deref()?;
            Some(self.push_best_effort(entry.shard.shard_id, cursor))
        }))
        .await;
        let pushed = outcomes.iter().filter(|ok| **ok).count();
        (pushed, outcomes.len() - pushed)
    }

    /// Push a cursor right after it was consumed, in `Immediate` mode only
    pub async fn on_consumed(&self, shard_id: ShardId, cursor: &str) -> bool {
        self.mode == CheckpointMode::Immediate && self.push_best_effort(shard_id, cursor).await
    }
}

impl std::fmt::Debug for CheckpointSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointSync")
            .field("project", &self.project)
            .field("logstore", &self.logstore)
            .field("consumer_group", &self.consumer_group)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
