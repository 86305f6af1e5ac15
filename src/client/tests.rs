//! Tests for the log client module

use super::*;
use crate::config::LogServiceConfig;
use crate::error::Error;
use crate::record::{RawLog, RawLogGroup};
use crate::shard::{ShardMeta, ShardStatus};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(endpoint: &str) -> LogServiceConfig {
    LogServiceConfig::new("demo", "access-log", endpoint).with_credentials("id", "secret")
}

fn fast_client(server: &MockServer) -> HttpLogClient {
    let config = HttpLogClientConfig::default()
        .no_rate_limit()
        .max_retries(2)
        .backoff(Duration::from_millis(1), Duration::from_millis(5));
    HttpLogClient::with_config(&service(&server.uri()), config).unwrap()
}

// ============================================================================
// HttpLogClient Tests
// ============================================================================

#[test]
fn test_http_client_rejects_bad_endpoint() {
    let err = HttpLogClient::new(&service("not a url")).unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
}

#[test]
fn test_calculate_backoff_is_capped() {
    let config = HttpLogClientConfig::default()
        .no_rate_limit()
        .backoff(Duration::from_millis(100), Duration::from_millis(350));
    let client = HttpLogClient::with_config(&service("http://localhost"), config).unwrap();

    assert_eq!(client.calculate_backoff(0), Duration::from_millis(100));
    assert_eq!(client.calculate_backoff(1), Duration::from_millis(200));
    assert_eq!(client.calculate_backoff(2), Duration::from_millis(350));
    assert_eq!(client.calculate_backoff(30), Duration::from_millis(350));
}

#[tokio::test]
async fn test_list_shards() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "shards": [
                {"shard_id": 0, "status": "readwrite", "begin_key": "00", "end_key": "80"},
                {"shard_id": 1, "status": "readonly"}
            ]
        })))
        .mount(&server)
        .await;

    let shards = fast_client(&server)
        .list_shards("demo", "access-log")
        .await
        .unwrap();

    assert_eq!(shards, vec![ShardMeta::new(0), ShardMeta::new(1)]);
    assert_eq!(shards[0].begin_key.as_deref(), Some("00"));
    assert!(shards[1].is_read_only());
}

#[tokio::test]
async fn test_list_shards_retries_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"shards": [{"shard_id": 4}]})))
        .mount(&server)
        .await;

    let shards = fast_client(&server)
        .list_shards("demo", "access-log")
        .await
        .unwrap();
    assert_eq!(shards, vec![ShardMeta::new(4)]);
}

#[tokio::test]
async fn test_rate_limited_request_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"shards": [{"shard_id": 2}]})))
        .mount(&server)
        .await;

    let shards = fast_client(&server)
        .list_shards("demo", "access-log")
        .await
        .unwrap();
    assert_eq!(shards, vec![ShardMeta::new(2)]);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(3)
        .mount(&server)
        .await;

    let err = fast_client(&server)
        .list_shards("demo", "access-log")
        .await
        .unwrap_err();
    match err {
        Error::MaxRetriesExceeded { max_retries, last } => {
            assert_eq!(max_retries, 2);
            assert!(matches!(*last, Error::HttpStatus { status: 503, .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards"))
        .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
        .expect(1)
        .mount(&server)
        .await;

    let err = fast_client(&server)
        .list_shards("demo", "access-log")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 403, ref body } if body == "denied"));
}

#[tokio::test]
async fn test_create_consumer_group_is_idempotent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/projects/demo/logstores/access-log/consumergroups"))
        .and(body_json(json!({"name": "etl"})))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    fast_client(&server)
        .create_consumer_group("demo", "access-log", "etl")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_and_fetch_checkpoint() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/projects/demo/logstores/access-log/consumergroups/etl/shards/2"))
        .and(body_json(json!({"checkpoint": "MTY5"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/consumergroups/etl/shards/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"checkpoint": "MTY5"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/consumergroups/etl/shards/3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = fast_client(&server);
    client
        .update_checkpoint("demo", "access-log", "etl", 2, "MTY5")
        .await
        .unwrap();

    assert_eq!(
        client
            .fetch_checkpoint("demo", "access-log", "etl", 2)
            .await
            .unwrap()
            .as_deref(),
        Some("MTY5")
    );
    assert!(client
        .fetch_checkpoint("demo", "access-log", "etl", 3)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_get_cursor_and_pull_logs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards/1/cursor"))
        .and(query_param("from", "begin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cursor": "c-0"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards/1/logs"))
        .and(query_param("cursor", "c-0"))
        .and(query_param("count", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "groups": [{"topic": "web", "logs": [{"time": 10, "contents": {"path": "/"}}]}],
            "next_cursor": "c-1"
        })))
        .mount(&server)
        .await;

    let client = fast_client(&server);
    let cursor = client
        .get_cursor("demo", "access-log", 1, CursorPosition::Begin)
        .await
        .unwrap();
    let pulled = client
        .pull_logs("demo", "access-log", 1, &cursor, 10)
        .await
        .unwrap();

    assert_eq!(pulled.next_cursor, "c-1");
    assert_eq!(pulled.groups.log_count(), 1);
    assert_eq!(pulled.groups.groups[0].logs[0].get("path"), Some("/"));
}

#[tokio::test]
async fn test_pull_logs_on_deleted_shard() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/demo/logstores/access-log/shards/9/logs"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = fast_client(&server)
        .pull_logs("demo", "access-log", 9, "c-0", 10)
        .await
        .unwrap_err();
    assert!(err.is_shard_gone());
}

#[tokio::test]
async fn test_put_logs() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/projects/demo/logstores/access-log/logs"))
        .and(body_json(json!({
            "topic": "web",
            "hash_key": "user-1",
            "logs": [{"time": 5, "contents": {"k": "v"}}]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = PutLogsRequest {
        topic: Some("web".to_string()),
        hash_key: Some("user-1".to_string()),
        logs: vec![RawLog::new(5).with_content("k", "v")],
        ..PutLogsRequest::default()
    };
    fast_client(&server)
        .put_logs("demo", "access-log", &request)
        .await
        .unwrap();
}

// ============================================================================
// InMemoryLogClient Tests
// ============================================================================

#[tokio::test]
async fn test_memory_client_pull_in_order() {
    let client = InMemoryLogClient::with_shards(2);
    for i in 0..5 {
        client
            .append(1, RawLogGroup::new().with_log(RawLog::new(i)), i)
            .unwrap();
    }

    let cursor = client
        .get_cursor("p", "l", 1, CursorPosition::Begin)
        .await
        .unwrap();
    let first = client.pull_logs("p", "l", 1, &cursor, 3).await.unwrap();
    assert_eq!(first.groups.log_count(), 3);
    assert_eq!(first.next_cursor, "3");

    let second = client
        .pull_logs("p", "l", 1, &first.next_cursor, 3)
        .await
        .unwrap();
    assert_eq!(second.groups.log_count(), 2);

    let empty = client
        .pull_logs("p", "l", 1, &second.next_cursor, 3)
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.next_cursor, "5");
}

#[tokio::test]
async fn test_memory_client_cursor_positions() {
    let client = InMemoryLogClient::with_shards(1);
    for ts in [100, 200, 300] {
        client
            .append(0, RawLogGroup::new().with_log(RawLog::new(ts)), ts)
            .unwrap();
    }

    let at = |position| {
        let client = &client;
        async move { client.get_cursor("p", "l", 0, position).await.unwrap() }
    };
    assert_eq!(at(CursorPosition::Begin).await, "0");
    assert_eq!(at(CursorPosition::End).await, "3");
    assert_eq!(at(CursorPosition::At(150)).await, "1");
    assert_eq!(at(CursorPosition::At(999)).await, "3");
}

#[tokio::test]
async fn test_memory_client_add_shard_replaces_meta_and_keeps_data() {
    let client = InMemoryLogClient::with_shards(1);
    client
        .append(0, RawLogGroup::new().with_log(RawLog::new(7)), 7)
        .unwrap();

    client.add_shard(ShardMeta::new(0).with_status(ShardStatus::ReadOnly));
    client.add_shard(ShardMeta::new(3));

    let shards = client.list_shards("p", "l").await.unwrap();
    assert_eq!(
        shards,
        vec![
            ShardMeta::new(0).with_status(ShardStatus::ReadOnly),
            ShardMeta::new(3)
        ]
    );
    let pulled = client.pull_logs("p", "l", 0, "0", 10).await.unwrap();
    assert_eq!(pulled.groups.log_count(), 1);
}

#[tokio::test]
async fn test_memory_client_removed_shard() {
    let client = InMemoryLogClient::with_shards(2);
    client.remove_shard(1);

    let shards = client.list_shards("p", "l").await.unwrap();
    assert_eq!(shards, vec![ShardMeta::new(0)]);

    let err = client.pull_logs("p", "l", 1, "0", 1).await.unwrap_err();
    assert!(err.is_shard_gone());
}

#[tokio::test]
async fn test_memory_client_checkpoints() {
    let client = InMemoryLogClient::with_shards(1);

    // Unknown group is rejected
    assert!(client.update_checkpoint("p", "l", "etl", 0, "1").await.is_err());

    client.create_consumer_group("p", "l", "etl").await.unwrap();
    client.create_consumer_group("p", "l", "etl").await.unwrap();
    client.update_checkpoint("p", "l", "etl", 0, "1").await.unwrap();

    assert!(client.has_consumer_group("etl"));
    assert_eq!(client.checkpoint("etl", 0).as_deref(), Some("1"));
    assert_eq!(client.checkpoint_updates().len(), 1);

    client.set_fail_update_checkpoint(true);
    assert!(client.update_checkpoint("p", "l", "etl", 0, "2").await.is_err());
    assert_eq!(client.checkpoint("etl", 0).as_deref(), Some("1"));
}

#[tokio::test]
async fn test_memory_client_list_failure_injection() {
    let client = InMemoryLogClient::with_shards(1);
    client.set_fail_list_shards(true);
    assert!(client.list_shards("p", "l").await.is_err());
    client.set_fail_list_shards(false);
    assert!(client.list_shards("p", "l").await.is_ok());
    assert_eq!(client.list_shards_calls(), 2);
}

#[tokio::test]
async fn test_memory_client_put_logs_routes_by_hash_key() {
    let client = InMemoryLogClient::with_shards(3);
    let request = PutLogsRequest {
        hash_key: Some("user-7".to_string()),
        logs: vec![RawLog::new(1)],
        ..PutLogsRequest::default()
    };

    for _ in 0..4 {
        client.put_logs("p", "l", &request).await.unwrap();
    }

    let counts: Vec<usize> = (0..3).map(|id| client.groups(id).len()).collect();
    assert_eq!(counts.iter().sum::<usize>(), 4);
    assert!(counts.contains(&4), "same hash key must land on one shard: {counts:?}");
}
