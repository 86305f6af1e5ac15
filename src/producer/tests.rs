//! Tests for the producer

use super::*;
use crate::client::{InMemoryLogClient, LogClient, PutLogsRequest};
use crate::codec::JsonLogSerializer;
use crate::config::{LogServiceConfig, ProducerConfig};
use crate::error::{Error, Result};
use crate::record::{RawLog, RawLogGroup};
use crate::shard::WorkerContext;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

fn config(package_timeout_ms: u64) -> ProducerConfig {
    ProducerConfig::new(
        LogServiceConfig::new("demo", "access-log", "http://localhost").with_credentials("id", "secret"),
    )
    .with_package_timeout(Duration::from_millis(package_timeout_ms))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Send(PutLogsRequest),
    Flush,
    Close,
}

/// Sender that records every call with its time
#[derive(Default)]
struct RecordingSender {
    events: Mutex<Vec<(Event, Instant)>>,
    package_timeout: Duration,
    fail_flush: bool,
}

impl RecordingSender {
    fn new(package_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            package_timeout,
            fail_flush: false,
        })
    }

    fn with_failing_flush(package_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            package_timeout,
            fail_flush: true,
        })
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    fn time_of(&self, wanted: &Event) -> Option<Instant> {
        self.events
            .lock()
            .iter()
            .find(|(e, _)| e == wanted)
            .map(|(_, t)| *t)
    }
}

#[async_trait]
impl RecordSender for RecordingSender {
    async fn send(&self, request: PutLogsRequest, callback: Box<dyn SendCallback>) -> Result<()> {
        self.events.lock().push((Event::Send(request), Instant::now()));
        callback.on_complete(&Ok(()));
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.events.lock().push((Event::Flush, Instant::now()));
        if self.fail_flush {
            return Err(Error::send("log service unavailable"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.events.lock().push((Event::Close, Instant::now()));
        Ok(())
    }

    fn package_timeout(&self) -> Duration {
        self.package_timeout
    }
}

/// Counts callback creations and completions
#[derive(Default)]
struct CountingFactory {
    created: Arc<Mutex<Vec<SendContext>>>,
    completed: Arc<AtomicUsize>,
}

struct CountingCallback {
    completed: Arc<AtomicUsize>,
}

impl SendCallback for CountingCallback {
    fn on_complete(self: Box<Self>, result: &Result<()>) {
        if result.is_ok() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl CallbackFactory for CountingFactory {
    fn create(&self, context: SendContext) -> Box<dyn SendCallback> {
        self.created.lock().push(context);
        Box::new(CountingCallback {
            completed: Arc::clone(&self.completed),
        })
    }
}

struct UserPartitioner {
    prefix: String,
}

impl LogPartitioner<Value> for UserPartitioner {
    fn initialize(&mut self, worker_index: u32, worker_count: u32) {
        self.prefix = format!("{worker_index}/{worker_count}");
    }

    fn hash_key(&self, value: &Value) -> Option<String> {
        value["user"]
            .as_str()
            .map(|user| format!("{}:{user}", self.prefix))
    }
}

// ============================================================================
// LogProducer Tests
// ============================================================================

#[tokio::test]
async fn test_invoke_before_open_fails() {
    let producer = LogProducer::new(JsonLogSerializer::new(), config(10)).unwrap();

    let err = producer.invoke(&json!({"a": 1})).await.unwrap_err();
    assert!(matches!(err, Error::IllegalState { .. }));
    assert!(!producer.is_open());
}

#[test]
fn test_new_validates_config() {
    let mut bad = config(10);
    bad.io_thread_count = 0;
    assert!(LogProducer::<Value, _>::new(JsonLogSerializer::new(), bad).is_err());
}

#[tokio::test]
async fn test_invoke_sends_serialized_group() {
    let sender = RecordingSender::new(Duration::from_millis(1));
    let mut producer = LogProducer::new(JsonLogSerializer::new().with_topic("audit"), config(1))
        .unwrap()
        .with_partitioner(UserPartitioner {
            prefix: String::new(),
        });
    producer
        .open_with_sender(WorkerContext::new(4, 2).unwrap(), sender.clone())
        .unwrap();

    producer.invoke(&json!({"user": "ann"})).await.unwrap();

    let events = sender.events();
    assert_eq!(events.len(), 1);
    let Event::Send(request) = &events[0] else {
        panic!("expected a send, got {events:?}");
    };
    assert_eq!(request.topic.as_deref(), Some("audit"));
    assert_eq!(request.hash_key.as_deref(), Some("2/4:ann"));
    assert_eq!(request.logs[0].get("user"), Some("ann"));
}

#[tokio::test]
async fn test_empty_serialization_sends_nothing() {
    let sender = RecordingSender::new(Duration::from_millis(1));
    let serializer = |value: &u32| -> Result<Option<RawLogGroup>> {
        Ok(match value {
            0 => None,
            1 => Some(RawLogGroup::new().with_topic("empty")),
            n => Some(RawLogGroup::new().with_log(RawLog::new(*n))),
        })
    };
    let mut producer = LogProducer::new(serializer, config(1)).unwrap();
    producer
        .open_with_sender(WorkerContext::single(), sender.clone())
        .unwrap();

    producer.invoke(&0).await.unwrap();
    producer.invoke(&1).await.unwrap();
    producer.invoke(&2).await.unwrap();

    assert_eq!(sender.events().len(), 1);
}

#[tokio::test]
async fn test_callback_per_send() {
    let sender = RecordingSender::new(Duration::from_millis(1));
    let factory = CountingFactory::default();
    let created = Arc::clone(&factory.created);
    let completed = Arc::clone(&factory.completed);
    let mut producer = LogProducer::new(JsonLogSerializer::new().with_source("host-1"), config(1))
        .unwrap()
        .with_callback_factory(factory);
    producer
        .open_with_sender(WorkerContext::single(), sender)
        .unwrap();

    producer.invoke(&json!({"a": 1})).await.unwrap();
    producer.invoke(&json!({"b": 2})).await.unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 2);
    let created = created.lock();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].source.as_deref(), Some("host-1"));
    assert_eq!(created[0].log_count, 1);
    assert_eq!(created[0].logstore, "access-log");
}

#[tokio::test]
async fn test_snapshot_flushes_then_waits_package_timeout() {
    let sender = RecordingSender::new(Duration::from_millis(60));
    let mut producer = LogProducer::new(JsonLogSerializer::new(), config(60)).unwrap();
    producer
        .open_with_sender(WorkerContext::single(), sender.clone())
        .unwrap();
    producer.invoke(&json!({"a": 1})).await.unwrap();

    producer.snapshot_state().await.unwrap();
    let finished = Instant::now();

    let flushed = sender.time_of(&Event::Flush).unwrap();
    assert!(finished.duration_since(flushed) >= Duration::from_millis(60));
    assert!(producer.is_open());
}

#[tokio::test]
async fn test_close_flushes_waits_and_is_idempotent() {
    let sender = RecordingSender::new(Duration::from_millis(30));
    let mut producer = LogProducer::new(JsonLogSerializer::new(), config(30)).unwrap();
    producer
        .open_with_sender(WorkerContext::single(), sender.clone())
        .unwrap();

    producer.close().await.unwrap();
    producer.close().await.unwrap();

    assert_eq!(sender.events(), vec![Event::Flush, Event::Close]);
    let flushed = sender.time_of(&Event::Flush).unwrap();
    let closed = sender.time_of(&Event::Close).unwrap();
    assert!(closed.duration_since(flushed) >= Duration::from_millis(30));

    let err = producer.invoke(&json!({"a": 1})).await.unwrap_err();
    assert!(matches!(err, Error::IllegalState { .. }));
}

#[tokio::test]
async fn test_close_still_closes_sender_when_flush_fails() {
    let sender = RecordingSender::with_failing_flush(Duration::from_secs(60));
    let mut producer = LogProducer::<Value, _>::new(JsonLogSerializer::new(), config(60_000)).unwrap();
    producer
        .open_with_sender(WorkerContext::single(), sender.clone())
        .unwrap();

    // No package-timeout wait after a failed flush
    tokio::time::timeout(Duration::from_secs(5), producer.close())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(sender.events(), vec![Event::Flush, Event::Close]);
    assert!(!producer.is_open());
}

#[tokio::test]
async fn test_open_twice_fails() {
    let mut producer = LogProducer::<Value, _>::new(JsonLogSerializer::new(), config(1)).unwrap();
    producer
        .open_with_sender(WorkerContext::single(), RecordingSender::new(Duration::ZERO))
        .unwrap();
    let err = producer
        .open_with_sender(WorkerContext::single(), RecordingSender::new(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, Error::IllegalState { .. }));
}

// ============================================================================
// BatchingSender Tests
// ============================================================================

fn request(topic: &str, n: u32) -> PutLogsRequest {
    PutLogsRequest {
        topic: Some(topic.to_string()),
        logs: vec![RawLog::new(n).with_content("n", n.to_string())],
        ..PutLogsRequest::default()
    }
}

fn callback(factory: &CountingFactory) -> Box<dyn SendCallback> {
    factory.create(SendContext::default())
}

#[tokio::test]
async fn test_batching_sender_splits_on_log_count() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    let mut config = config(60_000);
    config.logs_per_package = 2;
    let sender = BatchingSender::new(client.clone() as Arc<dyn LogClient>, &config);
    let factory = CountingFactory::default();

    for n in 0..5 {
        sender.send(request("web", n), callback(&factory)).await.unwrap();
    }
    sender.close().await.unwrap();

    let mut sizes: Vec<usize> = client.groups(0).iter().map(RawLogGroup::len).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2, 2]);
    assert_eq!(factory.completed.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_batching_sender_groups_by_topic() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    let sender = BatchingSender::new(client.clone() as Arc<dyn LogClient>, &config(60_000));
    let factory = CountingFactory::default();

    sender.send(request("web", 1), callback(&factory)).await.unwrap();
    sender.send(request("db", 2), callback(&factory)).await.unwrap();
    sender.send(request("web", 3), callback(&factory)).await.unwrap();
    sender.close().await.unwrap();

    let mut groups: Vec<(String, usize)> = client
        .groups(0)
        .into_iter()
        .map(|g| (g.topic.unwrap_or_default(), g.logs.len()))
        .collect();
    groups.sort();
    assert_eq!(groups, vec![("db".to_string(), 1), ("web".to_string(), 2)]);
}

#[tokio::test]
async fn test_batching_sender_sends_after_package_timeout() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    let sender = BatchingSender::new(client.clone() as Arc<dyn LogClient>, &config(20));
    let factory = CountingFactory::default();

    sender.send(request("web", 1), callback(&factory)).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while client.groups(0).is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    sender.close().await.unwrap();
}

#[tokio::test]
async fn test_batching_sender_flush_dispatches_partial_batches() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    let sender = BatchingSender::new(client.clone() as Arc<dyn LogClient>, &config(60_000));
    let factory = CountingFactory::default();

    sender.send(request("web", 1), callback(&factory)).await.unwrap();
    sender.flush().await.unwrap();

    timeout(Duration::from_secs(2), async {
        while factory.completed.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(client.groups(0).len(), 1);
    sender.close().await.unwrap();
}

#[tokio::test]
async fn test_batching_sender_reports_failures() {
    let client = Arc::new(InMemoryLogClient::new());
    let sender = BatchingSender::new(client as Arc<dyn LogClient>, &config(60_000));
    let factory = CountingFactory::default();

    sender.send(request("web", 1), callback(&factory)).await.unwrap();
    sender.close().await.unwrap();

    assert_eq!(factory.created.lock().len(), 1);
    assert_eq!(factory.completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batching_sender_rejects_after_close() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    let sender = BatchingSender::new(client as Arc<dyn LogClient>, &config(10));
    let factory = CountingFactory::default();

    sender.close().await.unwrap();
    sender.close().await.unwrap();

    let err = sender
        .send(request("web", 1), callback(&factory))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IllegalState { .. }));
}
