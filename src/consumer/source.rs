//! Consumer source

use crate::checkpoint::{
    CheckpointCoordinator, CheckpointSync, RestoreReconciler, RestoredCursors, SnapshotReport,
    SnapshotSource,
};
use crate::client::{HttpLogClient, LogClient};
use crate::codec::LogDeserializer;
use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::fetcher::{FetcherSettings, LogDataFetcher, OutputGate, OutputPause, ShardFetcher};
use crate::shard::{ShardState, WorkerContext};
use crate::state::UnionState;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Distributed, checkpointed consumer of one logstore
pub struct LogConsumer<D: LogDeserializer> {
    config: ConsumerConfig,
    ctx: WorkerContext,
    deserializer: Arc<D>,
    client: Arc<dyn LogClient>,
    sync: CheckpointSync,
    coordinator: CheckpointCoordinator,
    running: AtomicBool,
    state: RwLock<Option<Arc<dyn UnionState>>>,
    restored: RwLock<Option<RestoredCursors>>,
    fetcher: Mutex<Option<Arc<LogDataFetcher<D>>>>,
    gate: OutputGate,
}

impl<D: LogDeserializer> LogConsumer<D> {
    /// Create a consumer talking to the configured endpoint over HTTP
    pub fn new(deserializer: D, config: ConsumerConfig, ctx: WorkerContext) -> Result<Self> {
        config.validate()?;
        let client: Arc<dyn LogClient> = Arc::new(HttpLogClient::new(&config.service)?);
        Self::with_client(deserializer, config, ctx, client)
    }

    /// Create a consumer with a custom client
    pub fn with_client(
        deserializer: D,
        config: ConsumerConfig,
        ctx: WorkerContext,
        client: Arc<dyn LogClient>,
    ) -> Result<Self> {
        config.validate()?;
        let sync = CheckpointSync::new(Arc::clone(&client), &config);
        let coordinator = CheckpointCoordinator::new(ctx, sync.clone());
        Ok(Self {
            config,
            ctx,
            deserializer: Arc::new(deserializer),
            client,
            sync,
            coordinator,
            running: AtomicBool::new(true),
            state: RwLock::new(None),
            restored: RwLock::new(None),
            fetcher: Mutex::new(None),
            gate: OutputGate::new(),
        })
    }

    /// Worker context
    pub fn worker(&self) -> WorkerContext {
        self.ctx
    }

    /// Configuration
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Name of the produced element type
    pub fn produced_type(&self) -> &'static str {
        self.deserializer.produced_type()
    }

    /// Whether the consumer has not been cancelled
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cursors restored by `initialize_state`, if the state was restored
    pub fn restored_cursors(&self) -> Option<RestoredCursors> {
        self.restored.read().clone()
    }

    /// Checkpoint coordinator
    pub fn coordinator(&self) -> &CheckpointCoordinator {
        &self.coordinator
    }

    /// Attach union state.
    ///
    /// When `restored` is true, the entries of all workers are reconciled
    /// into this worker's resume positions. Only the first restore is
    /// applied.
    pub async fn initialize_state(&self, state: Arc<dyn UnionState>, restored: bool) -> Result<()> {
        if restored && self.restored.read().is_none() {
            let entries = state.read_all().await?;
            debug!("Read {} entries from restored union state", entries.len());
            let cursors = RestoreReconciler::new(self.ctx, &self.sync)
                .reconcile(entries)
                .await;
            *self.restored.write() = Some(cursors);
        } else if !restored {
            info!(
                "No restored state for worker {}/{}",
                self.ctx.worker_index(),
                self.ctx.worker_count()
            );
        }
        *self.state.write() = Some(state);
        Ok(())
    }

    /// Subscribe owned shards and pull until cancelled.
    ///
    /// Output is sent to `sink`; dropping the receiver stops the consumer.
    pub async fn run(&self, sink: mpsc::Sender<D::Output>) -> Result<()> {
        if let Some(group) = self.sync.consumer_group() {
            self.client
                .create_consumer_group(self.config.project(), self.config.logstore(), group)
                .await?;
            debug!(consumer_group = group, "Consumer group ready");
        }

        let fetcher = Arc::new(LogDataFetcher::new(
            self.ctx,
            FetcherSettings::from_config(&self.config),
            Arc::clone(&self.client),
            self.sync.clone(),
            Arc::clone(&self.deserializer),
            sink,
            self.gate.clone(),
        ));

        let shards = fetcher.discover_new_shards().await?;
        {
            let restored = self.restored.read();
            for shard in shards {
                let cursor = restored.as_ref().and_then(|r| r.cursor_for(&shard));
                if let Some(cursor) = &cursor {
                    info!("Resuming shard {} from restored cursor {}", shard.shard_id, cursor);
                }
                fetcher.register_shard(ShardState::new(shard, cursor));
            }
        }

        if !self.is_running() {
            return Ok(());
        }

        *self.fetcher.lock() = Some(Arc::clone(&fetcher));
        fetcher.start().await?;
        if !self.is_running() {
            fetcher.request_stop();
        }
        fetcher.await_stopped().await
    }

    /// Stop pulling. Idempotent.
    pub async fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
        let fetcher = self.fetcher.lock().take();
        if let Some(fetcher) = fetcher {
            fetcher.request_stop();
            if let Err(e) = fetcher.await_stopped().await {
                warn!("Fetcher stopped with error: {}", e);
            }
        }
    }

    /// Stop handing output to the sink until the returned pause is dropped.
    ///
    /// Resolves once every batch already handed over has its cursor
    /// recorded. A host that drains its receiver while holding the pause
    /// gets a snapshot covering exactly the output it received. A loop
    /// blocked on a full channel keeps the pause waiting, so keep receiving
    /// until it resolves.
    pub async fn pause_output(&self) -> OutputPause {
        self.gate.pause().await
    }

    /// Write this worker's cursors into union state.
    ///
    /// Returns `Ok(None)` after `cancel`, without touching the state.
    pub async fn snapshot_state(&self, checkpoint_id: u64) -> Result<Option<SnapshotReport>> {
        if !self.is_running() {
            debug!(checkpoint_id, "Snapshot requested after cancel, skipping");
            return Ok(None);
        }
        let state = self.state.read().clone().ok_or_else(|| {
            Error::illegal_state("initialize_state must be called before snapshot_state")
        })?;
        let fetcher = self.fetcher.lock().clone();
        let restored = self.restored.read().clone();

        let source = SnapshotSource::select(
            fetcher.as_deref().map(|f| f as &dyn ShardFetcher),
            restored.as_ref(),
        );
        let report = self
            .coordinator
            .snapshot(checkpoint_id, source, state.as_ref())
            .await?;
        Ok(Some(report))
    }

    /// Record that the host confirmed a checkpoint
    pub fn notify_checkpoint_complete(&self, checkpoint_id: u64) {
        self.coordinator.notify_checkpoint_complete(checkpoint_id);
    }

    /// Release resources; same as `cancel`
    pub async fn close(&self) {
        self.cancel().await;
    }
}
