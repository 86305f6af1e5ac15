//! Background batching sender

use super::callback::SendCallback;
use crate::client::{LogClient, PutLogsRequest};
use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Accepts log batches for asynchronous delivery
#[async_trait]
pub trait RecordSender: Send + Sync {
    /// Queue logs for sending; `callback` runs when they were written or failed
    async fn send(&self, request: PutLogsRequest, callback: Box<dyn SendCallback>) -> Result<()>;

    /// Hand every buffered batch to the I/O tasks without waiting for them
    async fn flush(&self) -> Result<()>;

    /// Flush, wait for in-flight writes and release resources
    async fn close(&self) -> Result<()>;

    /// Maximum time a batch is buffered
    fn package_timeout(&self) -> Duration;
}

enum Command {
    Send {
        request: PutLogsRequest,
        callback: Box<dyn SendCallback>,
        permit: OwnedSemaphorePermit,
    },
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// `RecordSender` that batches per `(topic, source, hash key, tags)`
///
/// A batch is sent when it reaches the log count or byte limit, when it is
/// older than the package timeout, or on `flush`. At most
/// `io_thread_count` writes run at once, and `send` waits while more than
/// `memory_pool_bytes` are buffered or in flight.
pub struct BatchingSender {
    commands: mpsc::UnboundedSender<Command>,
    memory: Arc<Semaphore>,
    memory_limit: usize,
    package_timeout: Duration,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchingSender {
    /// Start a sender writing through `client`. Must be called within a tokio runtime.
    pub fn new(client: Arc<dyn LogClient>, config: &ProducerConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let batcher = Batcher {
            client,
            project: config.service.project.clone(),
            logstore: config.service.logstore.clone(),
            logs_per_package: config.logs_per_package.max(1),
            bytes_per_package: config.bytes_per_package.max(1),
            package_timeout: config.package_timeout(),
            io: Arc::new(Semaphore::new(config.io_thread_count.max(1))),
            batches: HashMap::new(),
            inflight: JoinSet::new(),
        };
        let worker = tokio::spawn(batcher.run(rx));
        let memory_limit = config.memory_pool_bytes.clamp(1, u32::MAX as usize);

        Self {
            commands,
            memory: Arc::new(Semaphore::new(memory_limit)),
            memory_limit,
            package_timeout: config.package_timeout(),
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::illegal_state("sender is closed"))
    }
}

#[async_trait]
impl RecordSender for BatchingSender {
    async fn send(&self, request: PutLogsRequest, callback: Box<dyn SendCallback>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::illegal_state("sender is closed"));
        }
        let size = request.approximate_size().min(self.memory_limit) as u32;
        let permit = Arc::clone(&self.memory)
            .acquire_many_owned(size)
            .await
            .map_err(|_| Error::illegal_state("sender is closed"))?;
        self.command(Command::Send {
            request,
            callback,
            permit,
        })
    }

    async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Flush(ack))?;
        done.await
            .map_err(|_| Error::illegal_state("sender stopped during flush"))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (ack, done) = oneshot::channel();
        if self.command(Command::Close(ack)).is_ok() {
            let _ = done.await;
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| Error::send(format!("sender task failed: {e}")))?;
        }
        self.memory.close();
        Ok(())
    }

    fn package_timeout(&self) -> Duration {
        self.package_timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchKey {
    topic: Option<String>,
    source: Option<String>,
    hash_key: Option<String>,
    tags: BTreeMap<String, String>,
}

struct Batch {
    request: PutLogsRequest,
    bytes: usize,
    callbacks: Vec<Box<dyn SendCallback>>,
    permits: Vec<OwnedSemaphorePermit>,
    created: Instant,
}

impl Batch {
    fn new(key: &BatchKey) -> Self {
        Self {
            request: PutLogsRequest {
                topic: key.topic.clone(),
                source: key.source.clone(),
                hash_key: key.hash_key.clone(),
                tags: key.tags.clone(),
                logs: Vec::new(),
            },
            bytes: 0,
            callbacks: Vec::new(),
            permits: Vec::new(),
            created: Instant::now(),
        }
    }

    fn is_empty(&self) -> bool {
        self.request.logs.is_empty()
    }
}

struct Batcher {
    client: Arc<dyn LogClient>,
    project: String,
    logstore: String,
    logs_per_package: usize,
    bytes_per_package: usize,
    package_timeout: Duration,
    io: Arc<Semaphore>,
    batches: HashMap<BatchKey, Batch>,
    inflight: JoinSet<()>,
}

impl Batcher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let tick = (self.package_timeout / 2).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Send { request, callback, permit }) => {
                        self.add(request, callback, permit).await;
                    }
                    Some(Command::Flush(ack)) => {
                        self.dispatch_all().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Close(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                _ = ticker.tick() => self.dispatch_expired().await,
                Some(joined) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Send task failed: {}", e);
                    }
                }
            }
        }
    }

    async fn add(
        &mut self,
        request: PutLogsRequest,
        callback: Box<dyn SendCallback>,
        permit: OwnedSemaphorePermit,
    ) {
        let PutLogsRequest {
            topic,
            source,
            hash_key,
            tags,
            logs,
        } = request;
        let key = BatchKey {
            topic,
            source,
            hash_key,
            tags,
        };
        let bytes: usize = logs.iter().map(|l| l.approximate_size()).sum();

        let overflows = self.batches.get(&key).is_some_and(|batch| {
            !batch.is_empty()
                && (batch.request.logs.len() + logs.len() > self.logs_per_package
                    || batch.bytes + bytes > self.bytes_per_package)
        });
        if overflows {
            if let Some(batch) = self.batches.remove(&key) {
                self.dispatch(batch).await;
            }
        }

        let batch = self
            .batches
            .entry(key.clone())
            .or_insert_with(|| Batch::new(&key));
        batch.request.logs.extend(logs);
        batch.bytes += bytes;
        batch.callbacks.push(callback);
        batch.permits.push(permit);

        let full = batch.request.logs.len() >= self.logs_per_package
            || batch.bytes >= self.bytes_per_package;
        if full {
            if let Some(batch) = self.batches.remove(&key) {
                self.dispatch(batch).await;
            }
        }
    }

    async fn dispatch_expired(&mut self) {
        let timeout = self.package_timeout;
        let expired: Vec<BatchKey> = self
            .batches
            .iter()
            .filter(|(_, batch)| batch.created.elapsed() >= timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(batch) = self.batches.remove(&key) {
                self.dispatch(batch).await;
            }
        }
    }

    async fn dispatch_all(&mut self) {
        let batches: Vec<Batch> = self.batches.drain().map(|(_, batch)| batch).collect();
        for batch in batches {
            self.dispatch(batch).await;
        }
    }

    async fn dispatch(&mut self, batch: Batch) {
        if batch.is_empty() {
            for callback in batch.callbacks {
                callback.on_complete(&Ok(()));
            }
            return;
        }

        let io_permit = match Arc::clone(&self.io).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let failed = Err(Error::illegal_state("sender is closed"));
                for callback in batch.callbacks {
                    callback.on_complete(&failed);
                }
                return;
            }
        };

        debug!(
            logs = batch.request.logs.len(),
            bytes = batch.bytes,
            "Dispatching batch"
        );
        let client = Arc::clone(&self.client);
        let project = self.project.clone();
        let logstore = self.logstore.clone();
        self.inflight.spawn(async move {
            let Batch {
                request,
                callbacks,
                permits,
                ..
            } = batch;
            let result = client.put_logs(&project, &logstore, &request).await;
            for callback in callbacks {
                callback.on_complete(&result);
            }
            drop(permits);
            drop(io_permit);
        });
    }

    async fn shutdown(&mut self) {
        self.dispatch_all().await;
        while let Some(joined) = self.inflight.join_next().await {
            if let Err(e) = joined {
                warn!("Send task failed: {}", e);
            }
        }
    }
}
