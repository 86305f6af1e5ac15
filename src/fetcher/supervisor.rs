//! Tokio shard fetcher

use super::types::{FetcherSettings, OutputGate, ShardFetcher};
use crate::checkpoint::CheckpointSync;
use crate::client::{CursorPosition, LogClient};
use crate::codec::LogDeserializer;
use crate::config::StartPosition;
use crate::error::{Error, Result};
use crate::ledger::CursorLedger;
use crate::shard::{ShardId, ShardMeta, ShardState, WorkerContext};
use crate::state::CursorEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Fetcher with one tokio task per shard
///
/// A shard's cursor is recorded only after its output was accepted by the
/// sink, so a snapshot never runs ahead of what the host received. Output
/// handed over between two snapshots may be delivered again after a
/// restore. Handover and cursor recording happen under the read side of
/// the `OutputGate`.
pub struct LogDataFetcher<D: LogDeserializer> {
    shared: Arc<Shared<D>>,
}

struct Shared<D: LogDeserializer> {
    ctx: WorkerContext,
    settings: FetcherSettings,
    client: Arc<dyn LogClient>,
    sync: CheckpointSync,
    deserializer: Arc<D>,
    sink: mpsc::Sender<D::Output>,
    gate: OutputGate,
    ledger: CursorLedger,
    started: AtomicBool,
    stop: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
    active: Mutex<HashSet<ShardId>>,
    failure: Mutex<Option<Arc<Error>>>,
    joining: AtomicBool,
    stopped: watch::Sender<bool>,
}

impl<D: LogDeserializer> LogDataFetcher<D> {
    /// Create a fetcher; nothing runs until `start`.
    ///
    /// Output handover is blocked while `gate` is paused.
    pub fn new(
        ctx: WorkerContext,
        settings: FetcherSettings,
        client: Arc<dyn LogClient>,
        sync: CheckpointSync,
        deserializer: Arc<D>,
        sink: mpsc::Sender<D::Output>,
        gate: OutputGate,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let (stopped, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                ctx,
                settings,
                client,
                sync,
                deserializer,
                sink,
                gate,
                ledger: CursorLedger::new(),
                started: AtomicBool::new(false),
                stop,
                tasks: Mutex::new(JoinSet::new()),
                active: Mutex::new(HashSet::new()),
                failure: Mutex::new(None),
                joining: AtomicBool::new(false),
                stopped,
            }),
        }
    }

    /// The cursor ledger shared by the pull loops
    pub fn ledger(&self) -> &CursorLedger {
        &self.shared.ledger
    }

    /// Number of shards with a running pull loop
    pub fn active_shards(&self) -> usize {
        self.shared.active.lock().len()
    }
}

#[async_trait]
impl<D: LogDeserializer> ShardFetcher for LogDataFetcher<D> {
    async fn discover_new_shards(&self) -> Result<Vec<ShardMeta>> {
        self.shared.discover().await
    }

    fn register_shard(&self, state: ShardState) {
        self.shared.register(state);
    }

    async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.started.swap(true, Ordering::SeqCst) {
            return Err(Error::illegal_state("fetcher already started"));
        }

        let shards = shared.ledger.shards();
        info!(
            "Starting fetcher for {} shards of {}/{} (worker {}/{})",
            shards.len(),
            shared.settings.project,
            shared.settings.logstore,
            shared.ctx.worker_index(),
            shared.ctx.worker_count()
        );
        for shard in shards {
            shared.spawn_shard(shard);
        }

        if let Some(interval) = shared.settings.discovery_interval {
            let discovery = Arc::clone(shared);
            let stop = shared.stop.subscribe();
            shared
                .tasks
                .lock()
                .spawn(discovery.run_discovery(interval, stop));
        }
        Ok(())
    }

    fn request_stop(&self) {
        self.shared.stop.send_replace(true);
    }

    async fn await_stopped(&self) -> Result<()> {
        let shared = &self.shared;
        let mut stop = shared.stop.subscribe();
        stop_requested(&mut stop).await;

        // One join task per fetcher; every caller waits for its completion
        let mut stopped = shared.stopped.subscribe();
        if !shared.joining.swap(true, Ordering::SeqCst) {
            let joiner = Arc::clone(shared);
            tokio::spawn(async move {
                joiner.join_tasks().await;
                joiner.stopped.send_replace(true);
            });
        }
        let _ = stopped.wait_for(|done| *done).await;

        match shared.failure.lock().as_ref() {
            Some(e) => Err(Error::PullLoop(Arc::clone(e))),
            None => Ok(()),
        }
    }

    fn current_cursors(&self) -> Vec<CursorEntry> {
        self.shared.ledger.snapshot()
    }

    fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }
}

impl<D: LogDeserializer> Shared<D> {
    async fn discover(&self) -> Result<Vec<ShardMeta>> {
        let shards = self
            .client
            .list_shards(&self.settings.project, &self.settings.logstore)
            .await?;
        Ok(shards
            .into_iter()
            .filter(|s| self.ctx.owns(s) && !self.ledger.contains(s.shard_id))
            .collect())
    }

    fn register(self: &Arc<Self>, state: ShardState) {
        let ShardState { meta, cursor } = state;
        if !self.ledger.register(meta.clone(), cursor) {
            debug!(shard_id = meta.shard_id, "Shard already registered");
            return;
        }
        if self.started.load(Ordering::SeqCst) && !*self.stop.borrow() {
            self.spawn_shard(meta);
        }
    }

    fn spawn_shard(self: &Arc<Self>, shard: ShardMeta) {
        if !self.active.lock().insert(shard.shard_id) {
            return;
        }
        let shared = Arc::clone(self);
        let stop = self.stop.subscribe();
        self.tasks.lock().spawn(shared.run_shard(shard, stop));
    }

    fn fail(&self, err: Error) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(Arc::new(err));
            }
        }
        self.stop.send_replace(true);
    }

    /// Join every pull loop, aborting them after `shutdown_timeout`
    async fn join_tasks(&self) {
        let timeout = self.settings.shutdown_timeout;
        let deadline = Instant::now() + timeout;
        'join: loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            loop {
                match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(Some(Ok(()))) => {}
                    Ok(Some(Err(e))) => {
                        if e.is_panic() {
                            self.fail(Error::fetcher(format!("pull loop panicked: {e}")));
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            "{} fetcher tasks did not stop within {:?}, aborting them",
                            tasks.len(),
                            timeout
                        );
                        tasks.abort_all();
                        self.tasks.lock().abort_all();
                        break 'join;
                    }
                }
            }
        }
        info!("Fetcher stopped");
    }

    async fn run_shard(self: Arc<Self>, shard: ShardMeta, mut stop: watch::Receiver<bool>) {
        let shard_id = shard.shard_id;
        match self.pull_loop(&shard, &mut stop).await {
            Ok(()) => debug!(shard_id, "Pull loop stopped"),
            Err(e) if e.is_shard_gone() => {
                info!("Shard {} no longer exists, unsubscribing", shard_id);
                self.ledger.remove_shard(&shard);
            }
            Err(e) => {
                error!("Pull loop of shard {} failed: {}", shard_id, e);
                self.fail(e);
            }
        }
        self.active.lock().remove(&shard_id);
    }

    async fn pull_loop(&self, shard: &ShardMeta, stop: &mut watch::Receiver<bool>) -> Result<()> {
        let settings = &self.settings;
        let shard_id = shard.shard_id;

        let mut cursor = loop {
            if let Some(cursor) = self.ledger.cursor(shard_id) {
                break cursor;
            }
            match self.start_cursor(shard_id).await {
                Ok(cursor) => break cursor,
                Err(e) if e.is_shard_gone() => return Err(e),
                Err(e) => {
                    warn!("Failed to resolve start cursor of shard {}: {}", shard_id, e);
                    if pause(stop, settings.error_backoff).await {
                        return Ok(());
                    }
                }
            }
        };
        debug!(shard_id, cursor = %cursor, "Pull loop started");

        loop {
            if *stop.borrow() {
                return Ok(());
            }

            let pulled = self
                .client
                .pull_logs(
                    &settings.project,
                    &settings.logstore,
                    shard_id,
                    &cursor,
                    settings.max_groups_per_fetch,
                )
                .await;
            let result = match pulled {
                Ok(result) => result,
                Err(e) if e.is_shard_gone() => return Err(e),
                Err(e) => {
                    warn!("Pull from shard {} failed: {}", shard_id, e);
                    if pause(stop, settings.error_backoff).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let empty = result.is_empty();
            let advanced = result.next_cursor != cursor;
            if !empty || advanced {
                let handover = tokio::select! {
                    guard = self.gate.enter() => guard,
                    () = stop_requested(stop) => return Ok(()),
                };
                if !empty {
                    if let Some(output) = self.deserializer.deserialize(shard, result.groups)? {
                        tokio::select! {
                            sent = self.sink.send(output) => {
                                if sent.is_err() {
                                    info!("Output channel closed, stopping fetcher");
                                    self.stop.send_replace(true);
                                    return Ok(());
                                }
                            }
                            () = stop_requested(stop) => return Ok(()),
                        }
                    }
                }
                if advanced {
                    self.ledger.record_cursor(shard, result.next_cursor.clone())?;
                }
                drop(handover);
            }

            if advanced {
                self.sync.on_consumed(shard_id, &result.next_cursor).await;
                cursor = result.next_cursor;
            }

            if empty && pause(stop, settings.fetch_interval).await {
                return Ok(());
            }
        }
    }

    async fn start_cursor(&self, shard_id: ShardId) -> Result<String> {
        let settings = &self.settings;
        let position = match settings.start_position {
            StartPosition::Begin => CursorPosition::Begin,
            StartPosition::End => CursorPosition::End,
            StartPosition::Timestamp(ts) => CursorPosition::At(ts),
            StartPosition::Checkpoint => {
                if let Some(group) = self.sync.consumer_group() {
                    let checkpoint = self
                        .client
                        .fetch_checkpoint(&settings.project, &settings.logstore, group, shard_id)
                        .await?;
                    if let Some(cursor) = checkpoint {
                        return Ok(cursor);
                    }
                }
                CursorPosition::Begin
            }
        };
        self.client
            .get_cursor(&settings.project, &settings.logstore, shard_id, position)
            .await
    }

    async fn run_discovery(self: Arc<Self>, interval: Duration, mut stop: watch::Receiver<bool>) {
        loop {
            if pause(&mut stop, interval).await {
                return;
            }
            match self.discover().await {
                Ok(shards) => {
                    for shard in shards {
                        info!("Discovered new shard {}", shard.shard_id);
                        self.register(ShardState::new(shard, None));
                    }
                }
                Err(e) => warn!("Shard discovery failed: {}", e),
            }
        }
    }
}

/// Resolves once stop was requested or the stop sender is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Sleep for `duration`; returns `true` when stop was requested
async fn pause(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        () = stop_requested(stop) => true,
    }
}
