//! Tests for the consumer lifecycle

use super::*;
use crate::client::{InMemoryLogClient, LogClient};
use crate::codec::{LogDeserializer, RawLogGroupListDeserializer};
use crate::config::{ConsumerConfig, LogServiceConfig};
use crate::error::Error;
use crate::record::{RawLog, RawLogGroup, RawLogGroupList};
use crate::shard::{ShardMeta, WorkerContext};
use crate::state::{CursorEntry, MemoryUnionState, UnionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn config() -> ConsumerConfig {
    let mut config = ConsumerConfig::new(
        LogServiceConfig::new("demo", "access-log", "http://localhost").with_credentials("id", "secret"),
    );
    config.fetch_interval_ms = 5;
    config
}

fn entry(shard_id: u32, cursor: Option<&str>) -> CursorEntry {
    CursorEntry::new(ShardMeta::new(shard_id), cursor.map(str::to_string))
}

fn consumer(
    client: &Arc<InMemoryLogClient>,
    config: ConsumerConfig,
    ctx: WorkerContext,
) -> Arc<LogConsumer<RawLogGroupListDeserializer>> {
    let client: Arc<dyn LogClient> = client.clone();
    Arc::new(LogConsumer::with_client(RawLogGroupListDeserializer, config, ctx, client).unwrap())
}

fn group(n: u32) -> RawLogGroup {
    RawLogGroup::new().with_log(RawLog::new(n))
}

async fn next_times(rx: &mut mpsc::Receiver<RawLogGroupList>) -> Vec<u32> {
    let batch = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for output")
        .expect("channel closed");
    batch
        .groups
        .iter()
        .flat_map(|g| g.logs.iter().map(|l| l.time))
        .collect()
}

#[test]
fn test_new_validates_config() {
    let config = ConsumerConfig::new(LogServiceConfig::new("demo", "", "http://localhost"));
    let err = LogConsumer::new(RawLogGroupListDeserializer, config, WorkerContext::single())
        .err()
        .unwrap();
    assert!(matches!(err, Error::MissingConfigField { .. }));
}

#[test]
fn test_produced_type() {
    let client = Arc::new(InMemoryLogClient::new());
    let consumer = consumer(&client, config(), WorkerContext::single());
    assert!(consumer.produced_type().ends_with("RawLogGroupList"));
}

#[tokio::test]
async fn test_snapshot_requires_initialized_state() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    let consumer = consumer(&client, config(), WorkerContext::single());

    let err = consumer.snapshot_state(1).await.unwrap_err();
    assert!(matches!(err, Error::IllegalState { .. }));
}

#[tokio::test]
async fn test_fresh_snapshot_before_run_is_empty() {
    let client = Arc::new(InMemoryLogClient::with_shards(2));
    let consumer = consumer(&client, config(), WorkerContext::single());
    let state = Arc::new(MemoryUnionState::new());
    consumer.initialize_state(state.clone(), false).await.unwrap();

    let report = consumer.snapshot_state(1).await.unwrap().unwrap();

    assert!(report.entries.is_empty());
    assert!(consumer.restored_cursors().is_none());
}

#[tokio::test]
async fn test_restored_snapshot_before_run_refilters_ownership() {
    let client = Arc::new(InMemoryLogClient::with_shards(4));
    let consumer = consumer(&client, config(), WorkerContext::new(2, 0).unwrap());
    let state = Arc::new(MemoryUnionState::restored(
        1,
        vec![entry(0, Some("a")), entry(1, Some("b")), entry(2, None), entry(9, Some("gone"))],
    ));
    consumer.initialize_state(state.clone(), true).await.unwrap();

    let report = consumer.snapshot_state(1).await.unwrap().unwrap();

    assert_eq!(report.entries, vec![entry(0, Some("a")), entry(2, None)]);
    assert_eq!(state.for_worker(0).own_entries().await, report.entries);
}

#[tokio::test]
async fn test_run_consumes_and_snapshots() {
    let client = Arc::new(InMemoryLogClient::with_shards(2));
    client.append(0, group(1), 0).unwrap();
    client.append(1, group(2), 0).unwrap();

    let consumer = consumer(&client, config().with_consumer_group("readers"), WorkerContext::single());
    let state = Arc::new(MemoryUnionState::new());
    consumer.initialize_state(state.clone(), false).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let runner = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(tx).await }
    });

    let mut seen = next_times(&mut rx).await;
    seen.extend(next_times(&mut rx).await);
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2]);
    assert!(client.has_consumer_group("readers"));

    let report = timeout(Duration::from_secs(2), async {
        loop {
            let report = consumer.snapshot_state(1).await.unwrap().unwrap();
            if report.entries.iter().all(|e| e.cursor.as_deref() == Some("1")) {
                break report;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.pushed, 2);
    assert_eq!(client.checkpoint("readers", 1).as_deref(), Some("1"));

    consumer.cancel().await;
    timeout(Duration::from_secs(2), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_restore_resumes_from_cursor() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    for n in 0..3 {
        client.append(0, group(n), 0).unwrap();
    }

    let consumer = consumer(&client, config(), WorkerContext::single());
    let state = Arc::new(MemoryUnionState::restored(0, vec![entry(0, Some("2"))]));
    consumer.initialize_state(state, true).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let runner = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(tx).await }
    });

    assert_eq!(next_times(&mut rx).await, vec![2]);
    consumer.cancel().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_before_run_returns_immediately() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    client.append(0, group(1), 0).unwrap();
    let consumer = consumer(&client, config(), WorkerContext::single());

    consumer.cancel().await;
    let (tx, mut rx) = mpsc::channel(8);
    timeout(Duration::from_secs(1), consumer.run(tx))
        .await
        .unwrap()
        .unwrap();

    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_snapshot_after_cancel_is_noop() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    let consumer = consumer(&client, config(), WorkerContext::single());
    let state = Arc::new(MemoryUnionState::restored(0, vec![entry(0, Some("kept"))]));
    consumer.initialize_state(state.clone(), false).await.unwrap();

    consumer.cancel().await;
    consumer.close().await;

    assert!(consumer.snapshot_state(5).await.unwrap().is_none());
    assert_eq!(state.read_all().await.unwrap(), vec![entry(0, Some("kept"))]);
    assert!(!consumer.is_running());
}

#[tokio::test]
async fn test_only_first_restore_applies() {
    let client = Arc::new(InMemoryLogClient::with_shards(2));
    let consumer = consumer(&client, config(), WorkerContext::single());

    let first = Arc::new(MemoryUnionState::restored(0, vec![entry(0, Some("a"))]));
    consumer.initialize_state(first, true).await.unwrap();
    let second = Arc::new(MemoryUnionState::restored(0, vec![entry(1, Some("b"))]));
    consumer.initialize_state(second, true).await.unwrap();

    let restored = consumer.restored_cursors().unwrap();
    assert!(restored.contains(&ShardMeta::new(0)));
    assert!(!restored.contains(&ShardMeta::new(1)));
}

#[tokio::test]
async fn test_notify_checkpoint_complete() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    let consumer = consumer(&client, config(), WorkerContext::single());
    consumer.notify_checkpoint_complete(9);
    assert_eq!(consumer.coordinator().last_completed(), 9);
}

/// Fails the first pull after blocking its thread for a while
struct SlowFailingDeserializer {
    entered: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl LogDeserializer for SlowFailingDeserializer {
    type Output = ();

    fn deserialize(&self, _shard: &ShardMeta, _groups: RawLogGroupList) -> crate::Result<Option<()>> {
        self.entered.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(150));
        self.finished.store(true, Ordering::SeqCst);
        Err(Error::deserialize("unreadable log"))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_waits_for_loops_and_run_keeps_failure() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    client.append(0, group(1), 0).unwrap();

    let entered = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let deserializer = SlowFailingDeserializer {
        entered: Arc::clone(&entered),
        finished: Arc::clone(&finished),
    };
    let client_dyn: Arc<dyn LogClient> = client.clone();
    let consumer = Arc::new(
        LogConsumer::with_client(deserializer, config(), WorkerContext::single(), client_dyn)
            .unwrap(),
    );

    let (tx, _rx) = mpsc::channel(8);
    let runner = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(tx).await }
    });

    timeout(Duration::from_secs(2), async {
        while !entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    timeout(Duration::from_secs(2), consumer.cancel()).await.unwrap();
    assert!(finished.load(Ordering::SeqCst));

    let err = timeout(Duration::from_secs(2), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    match err {
        Error::PullLoop(inner) => assert!(matches!(*inner, Error::Deserialize { .. })),
        other => panic!("expected pull loop failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pause_output_defers_records_until_released() {
    let client = Arc::new(InMemoryLogClient::with_shards(1));
    client.append(0, group(1), 0).unwrap();

    let consumer = consumer(&client, config(), WorkerContext::single());
    let state = Arc::new(MemoryUnionState::new());
    consumer.initialize_state(state, false).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let runner = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(tx).await }
    });
    assert_eq!(next_times(&mut rx).await, vec![1]);

    let pause = consumer.pause_output().await;
    let report = consumer.snapshot_state(1).await.unwrap().unwrap();
    assert_eq!(report.entries, vec![entry(0, Some("1"))]);

    client.append(0, group(2), 0).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err());
    let report = consumer.snapshot_state(2).await.unwrap().unwrap();
    assert_eq!(report.entries, vec![entry(0, Some("1"))]);

    drop(pause);
    assert_eq!(next_times(&mut rx).await, vec![2]);
    consumer.cancel().await;
    runner.await.unwrap().unwrap();
}
