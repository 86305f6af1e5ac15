//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::client::{HttpLogClient, LogClient};
use crate::codec::{JsonLogDeserializer, JsonLogSerializer};
use crate::config::{ConsumerConfig, ProducerConfig};
use crate::consumer::LogConsumer;
use crate::fetcher::OutputPause;
use crate::error::{Error, Result, ResultExt};
use crate::producer::{LogPartitioner, LogProducer};
use crate::shard::{ShardMeta, WorkerContext};
use crate::state::{FileUnionState, MemoryUnionState, UnionState, UnionStateFile};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Shards => self.shards().await,
            Commands::Consume {
                consumer_group,
                max_records,
                checkpoint_interval_ms,
            } => {
                self.consume(
                    consumer_group.as_deref(),
                    *max_records,
                    Duration::from_millis(*checkpoint_interval_ms),
                )
                .await
            }
            Commands::State { owned } => self.state(*owned).await,
            Commands::Produce {
                input,
                topic,
                source,
                time_field,
                hash_field,
            } => {
                self.produce(
                    input.as_ref(),
                    topic.as_deref(),
                    source.as_deref(),
                    time_field.as_deref(),
                    hash_field.as_deref(),
                )
                .await
            }
        }
    }

    fn worker(&self) -> Result<WorkerContext> {
        WorkerContext::new(self.cli.worker_count, self.cli.worker_index)
    }

    fn config_path(&self) -> Result<&PathBuf> {
        self.cli
            .config
            .as_ref()
            .ok_or_else(|| Error::config("Config file not specified (use -C flag)"))
    }

    fn state_path(&self) -> Result<&PathBuf> {
        self.cli
            .state
            .as_ref()
            .ok_or_else(|| Error::config("State file not specified (use -s flag)"))
    }

    /// List shards
    async fn shards(&self) -> Result<()> {
        let config = ConsumerConfig::from_file(self.config_path()?)?;
        let ctx = self.worker()?;
        let client = HttpLogClient::new(&config.service)?;
        let shards = client
            .list_shards(config.project(), config.logstore())
            .await?;
        for row in shard_rows(&shards, &ctx) {
            self.output_message(&row);
        }
        Ok(())
    }

    /// Consume records until interrupted or `max_records` were printed
    async fn consume(
        &self,
        consumer_group: Option<&str>,
        max_records: Option<usize>,
        checkpoint_interval: Duration,
    ) -> Result<()> {
        let mut config = ConsumerConfig::from_file(self.config_path()?)?;
        if let Some(group) = consumer_group {
            config = config.with_consumer_group(group);
        }
        let ctx = self.worker()?;
        let consumer = Arc::new(LogConsumer::new(JsonLogDeserializer, config, ctx)?);

        let (state, restored): (Arc<dyn UnionState>, bool) = match &self.cli.state {
            Some(path) => {
                let state = FileUnionState::open(path, ctx.worker_index()).await?;
                let restored = state.was_restored();
                (Arc::new(state), restored)
            }
            None => (Arc::new(MemoryUnionState::new()), false),
        };
        consumer.initialize_state(state, restored).await?;

        let (tx, mut rx) = mpsc::channel(64);
        let runner = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move { consumer.run(tx).await }
        });

        let printed = drive(
            &consumer,
            &mut rx,
            max_records,
            checkpoint_interval,
            &mut |msg| self.output_message(&msg),
        )
        .await?;
        drop(rx);

        runner
            .await
            .map_err(|e| Error::Other(format!("consumer task failed: {e}")))??;
        info!("Consumed {} records", printed);
        Ok(())
    }

    /// Print the union state file
    async fn state(&self, owned: bool) -> Result<()> {
        let ctx = self.worker()?;
        let state = FileUnionState::open(self.state_path()?, ctx.worker_index()).await?;
        if !state.was_restored() {
            return Err(Error::state(format!(
                "State file {} does not exist",
                state.path().display()
            )));
        }
        let contents = state.contents().await;
        for row in state_rows(&contents, owned.then_some(&ctx)) {
            self.output_message(&row);
        }
        Ok(())
    }

    /// Write JSON lines as logs
    async fn produce(
        &self,
        input: Option<&PathBuf>,
        topic: Option<&str>,
        source: Option<&str>,
        time_field: Option<&str>,
        hash_field: Option<&str>,
    ) -> Result<()> {
        let config = ProducerConfig::from_file(self.config_path()?)?;
        let ctx = self.worker()?;

        let mut serializer = JsonLogSerializer::new();
        if let Some(topic) = topic {
            serializer = serializer.with_topic(topic);
        }
        if let Some(source) = source {
            serializer = serializer.with_source(source);
        }
        if let Some(field) = time_field {
            serializer = serializer.with_time_field(field);
        }

        let mut producer = LogProducer::new(serializer, config)?;
        if let Some(field) = hash_field {
            producer = producer.with_partitioner(FieldPartitioner::new(field));
        }
        producer.open(ctx)?;

        let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match input {
            Some(path) => Box::new(tokio::fs::File::open(path).await?),
            None => Box::new(tokio::io::stdin()),
        };
        let mut lines = BufReader::new(reader).lines();
        let mut sent = 0usize;
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value =
                serde_json::from_str(line).with_context(|| format!("invalid JSON on line {line_no}"))?;
            producer.invoke(&value).await?;
            sent += 1;
        }

        producer.close().await?;
        self.output_message(&json!({"type": "LOG", "message": format!("Sent {sent} records")}));
        Ok(())
    }

    /// Output a message
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// Print records and take periodic checkpoints until the channel closes,
/// Ctrl-C, or `max_records` were printed.
///
/// Output is paused and the channel drained before every checkpoint, so a
/// snapshot never covers a record that was not printed. Batches are always
/// printed whole. The consumer is closed before returning.
pub(crate) async fn drive(
    consumer: &LogConsumer<JsonLogDeserializer>,
    rx: &mut mpsc::Receiver<Vec<Value>>,
    max_records: Option<usize>,
    checkpoint_interval: Duration,
    emit: &mut dyn FnMut(Value),
) -> Result<usize> {
    let mut ticker = tokio::time::interval(checkpoint_interval.max(Duration::from_millis(1)));
    ticker.tick().await;
    let mut checkpoint_id = 0u64;
    let mut printed = 0usize;

    loop {
        if max_records.is_some_and(|max| printed >= max) {
            break;
        }
        tokio::select! {
            batch = rx.recv() => {
                let Some(records) = batch else {
                    break;
                };
                printed += emit_records(records, emit);
            }
            _ = ticker.tick() => {
                let (pause, drained) = pause_and_drain(consumer, rx, emit).await;
                printed += drained;
                checkpoint_id = next_checkpoint_id(checkpoint_id);
                checkpoint(consumer, checkpoint_id, emit).await?;
                drop(pause);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping consumer");
                break;
            }
        }
    }

    let (pause, drained) = pause_and_drain(consumer, rx, emit).await;
    printed += drained;
    checkpoint_id = next_checkpoint_id(checkpoint_id);
    checkpoint(consumer, checkpoint_id, emit).await?;
    consumer.close().await;
    drop(pause);
    Ok(printed)
}

/// Pause the consumer's output, printing whatever it hands over meanwhile
async fn pause_and_drain(
    consumer: &LogConsumer<JsonLogDeserializer>,
    rx: &mut mpsc::Receiver<Vec<Value>>,
    emit: &mut dyn FnMut(Value),
) -> (OutputPause, usize) {
    let mut printed = 0;
    let pause = consumer.pause_output();
    tokio::pin!(pause);
    let pause = loop {
        tokio::select! {
            paused = &mut pause => break paused,
            batch = rx.recv() => match batch {
                Some(records) => printed += emit_records(records, emit),
                None => break (&mut pause).await,
            },
        }
    };
    while let Ok(records) = rx.try_recv() {
        printed += emit_records(records, emit);
    }
    (pause, printed)
}

fn emit_records(records: Vec<Value>, emit: &mut dyn FnMut(Value)) -> usize {
    let count = records.len();
    for record in records {
        emit(json!({"type": "RECORD", "record": record}));
    }
    count
}

async fn checkpoint(
    consumer: &LogConsumer<JsonLogDeserializer>,
    checkpoint_id: u64,
    emit: &mut dyn FnMut(Value),
) -> Result<()> {
    if let Some(report) = consumer.snapshot_state(checkpoint_id).await? {
        consumer.notify_checkpoint_complete(checkpoint_id);
        emit(json!({
            "type": "STATE",
            "checkpoint_id": report.checkpoint_id,
            "entries": report.entries,
            "pushed": report.pushed,
            "push_failures": report.push_failures,
        }));
    }
    Ok(())
}

/// Checkpoint ids grow across restarts of the CLI
pub(crate) fn next_checkpoint_id(previous: u64) -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    now.max(previous.saturating_add(1))
}

/// Routes JSON objects by the string value of one field
#[derive(Debug, Clone)]
pub(crate) struct FieldPartitioner {
    field: String,
}

impl FieldPartitioner {
    pub(crate) fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl LogPartitioner<Value> for FieldPartitioner {
    fn hash_key(&self, value: &Value) -> Option<String> {
        match value.get(&self.field)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// One output row per shard
pub(crate) fn shard_rows(shards: &[ShardMeta], ctx: &WorkerContext) -> Vec<Value> {
    shards
        .iter()
        .map(|shard| {
            json!({
                "type": "SHARD",
                "shard_id": shard.shard_id,
                "status": shard.status,
                "begin_key": shard.begin_key,
                "end_key": shard.end_key,
                "owner": shard.shard_id % ctx.worker_count(),
                "owned": ctx.owns(shard),
            })
        })
        .collect()
}

/// One output row per state entry, optionally limited to `ctx`'s shards
pub(crate) fn state_rows(contents: &UnionStateFile, ctx: Option<&WorkerContext>) -> Vec<Value> {
    contents
        .writers
        .iter()
        .flat_map(|(writer, section)| {
            section.entries.iter().map(move |entry| (*writer, section, entry))
        })
        .filter(|(_, _, entry)| ctx.map_or(true, |ctx| ctx.owns(&entry.shard)))
        .map(|(writer, section, entry)| {
            json!({
                "type": "STATE_ENTRY",
                "writer": writer,
                "updated_at": section.updated_at,
                "checkpoint_id": section.checkpoint_id,
                "shard_id": entry.shard.shard_id,
                "cursor": entry.cursor,
            })
        })
        .collect()
}
