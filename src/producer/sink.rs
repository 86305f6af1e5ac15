//! Producer sink

use super::callback::{CallbackFactory, LoggingCallbackFactory, SendContext};
use super::sender::{BatchingSender, RecordSender};
use crate::client::{HttpLogClient, LogClient, PutLogsRequest};
use crate::codec::LogSerializer;
use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use crate::shard::WorkerContext;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Picks the shard hash key of an element
pub trait LogPartitioner<T>: Send + Sync {
    /// Called once from `open` with this worker's position
    fn initialize(&mut self, _worker_index: u32, _worker_count: u32) {}

    /// Hash key for the element; `None` lets the service pick a shard
    fn hash_key(&self, value: &T) -> Option<String>;
}

/// Sink writing serialized elements to one logstore
///
/// Sends are asynchronous: `invoke` returns once the logs are buffered.
/// `snapshot_state` and `close` flush the buffer and then wait one package
/// timeout so in-flight batches can land before the checkpoint completes.
pub struct LogProducer<T, S> {
    config: ProducerConfig,
    serializer: S,
    partitioner: Option<Box<dyn LogPartitioner<T>>>,
    callbacks: Arc<dyn CallbackFactory>,
    sender: Option<Arc<dyn RecordSender>>,
}

impl<T, S: LogSerializer<T>> LogProducer<T, S> {
    /// Create a producer; nothing is sent before `open`
    pub fn new(serializer: S, config: ProducerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            serializer,
            partitioner: None,
            callbacks: Arc::new(LoggingCallbackFactory),
            sender: None,
        })
    }

    /// Route elements by a custom partitioner
    #[must_use]
    pub fn with_partitioner(mut self, partitioner: impl LogPartitioner<T> + 'static) -> Self {
        self.partitioner = Some(Box::new(partitioner));
        self
    }

    /// Use a custom callback factory
    #[must_use]
    pub fn with_callback_factory(mut self, factory: impl CallbackFactory + 'static) -> Self {
        self.callbacks = Arc::new(factory);
        self
    }

    /// Configuration
    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Whether `open` was called and `close` was not
    pub fn is_open(&self) -> bool {
        self.sender.is_some()
    }

    /// Open against the configured endpoint over HTTP
    pub fn open(&mut self, ctx: WorkerContext) -> Result<()> {
        let client: Arc<dyn LogClient> = Arc::new(HttpLogClient::new(&self.config.service)?);
        self.open_with_client(ctx, client)
    }

    /// Open with a custom client
    pub fn open_with_client(&mut self, ctx: WorkerContext, client: Arc<dyn LogClient>) -> Result<()> {
        let sender = Arc::new(BatchingSender::new(client, &self.config));
        self.open_with_sender(ctx, sender)
    }

    /// Open with a custom sender
    pub fn open_with_sender(&mut self, ctx: WorkerContext, sender: Arc<dyn RecordSender>) -> Result<()> {
        if self.sender.is_some() {
            return Err(Error::illegal_state("log producer is already open"));
        }
        if let Some(partitioner) = self.partitioner.as_mut() {
            partitioner.initialize(ctx.worker_index(), ctx.worker_count());
        }
        self.sender = Some(sender);
        info!(
            "Started log producer for {}/{}",
            self.config.service.project, self.config.service.logstore
        );
        Ok(())
    }

    /// Serialize and queue one element
    pub async fn invoke(&self, value: &T) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::illegal_state("log producer has not been opened"))?;

        let Some(group) = self.serializer.serialize(value)? else {
            debug!("Serializer produced no log group, nothing to send");
            return Ok(());
        };
        if group.logs.is_empty() {
            return Ok(());
        }

        let hash_key = self.partitioner.as_ref().and_then(|p| p.hash_key(value));
        let callback = self.callbacks.create(SendContext {
            project: self.config.service.project.clone(),
            logstore: self.config.service.logstore.clone(),
            topic: group.topic.clone(),
            source: group.source.clone(),
            hash_key: hash_key.clone(),
            log_count: group.logs.len(),
        });
        let request = PutLogsRequest {
            topic: group.topic,
            source: group.source,
            hash_key,
            tags: group.tags,
            logs: group.logs,
        };
        sender.send(request, callback).await
    }

    /// Flush buffered logs and wait one package timeout
    pub async fn snapshot_state(&self) -> Result<()> {
        if let Some(sender) = &self.sender {
            sender.flush().await?;
            tokio::time::sleep(sender.package_timeout()).await;
        }
        Ok(())
    }

    /// Flush, wait one package timeout and close the sender. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(sender) = self.sender.take() {
            match sender.flush().await {
                Ok(()) => tokio::time::sleep(sender.package_timeout()).await,
                Err(e) => warn!("Flush before close failed: {}", e),
            }
            sender.close().await?;
            info!("Log producer closed");
        }
        Ok(())
    }
}
