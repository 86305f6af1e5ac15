//! HTTP log service client
//!
//! Talks JSON to `{endpoint}/projects/{project}/logstores/{logstore}/...`:
//! - Automatic retries with exponential backoff
//! - Optional rate limiting shared by all callers
//! - Status classification (404 on shard paths means the shard is gone,
//!   409 on consumer group creation means it already exists)

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use super::types::{CursorPosition, LogClient, PullResult, PutLogsRequest};
use crate::config::LogServiceConfig;
use crate::error::{Error, Result};
use crate::shard::{ShardId, ShardMeta};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Transport settings for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpLogClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Maximum number of retries
    pub max_retries: u32,
    /// Initial delay for backoff
    pub initial_backoff: Duration,
    /// Maximum delay for backoff
    pub max_backoff: Duration,
    /// Rate limiter configuration
    pub rate_limit: Option<RateLimiterConfig>,
}

impl Default for HttpLogClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            rate_limit: Some(RateLimiterConfig::default()),
        }
    }
}

impl HttpLogClientConfig {
    /// Set max retries
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set backoff bounds
    #[must_use]
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disable rate limiting
    #[must_use]
    pub fn no_rate_limit(mut self) -> Self {
        self.rate_limit = None;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ShardListResponse {
    #[serde(default)]
    shards: Vec<ShardMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointBody {
    #[serde(default)]
    checkpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CursorResponse {
    cursor: String,
}

/// HTTP implementation of `LogClient`
pub struct HttpLogClient {
    client: Client,
    base: Url,
    access_key_id: String,
    access_key_secret: String,
    config: HttpLogClientConfig,
    rate_limiter: Option<RateLimiter>,
}

impl HttpLogClient {
    /// Create a client with default transport settings
    pub fn new(service: &LogServiceConfig) -> Result<Self> {
        Self::with_config(service, HttpLogClientConfig::default())
    }

    /// Create a client with custom transport settings
    pub fn with_config(service: &LogServiceConfig, config: HttpLogClientConfig) -> Result<Self> {
        let base = Url::parse(&service.endpoint)?;
        if base.cannot_be_a_base() {
            return Err(Error::invalid_value("endpoint", "cannot be used as a base URL"));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&service.user_agent)
            .build()?;

        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);

        Ok(Self {
            client,
            base,
            access_key_id: service.access_key_id.clone(),
            access_key_secret: service.access_key_secret.clone(),
            config,
            rate_limiter,
        })
    }

    /// Build the URL of a logstore resource
    fn url(&self, project: &str, logstore: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::invalid_value("endpoint", "cannot be used as a base URL"))?;
            path.pop_if_empty();
            path.extend(["projects", project, "logstores", logstore]);
            path.extend(segments);
        }
        Ok(url)
    }

    /// Send a request, retrying transient failures
    async fn send(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;

        loop {
            if let Some(ref limiter) = self.rate_limiter {
                limiter.wait().await;
            }

            let mut req = self
                .client
                .request(method.clone(), url.clone())
                .basic_auth(&self.access_key_id, Some(&self.access_key_secret));
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            let error = match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(method = %method, url = %url, "Request succeeded");
                        return Ok(response);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        Error::RateLimited {
                            retry_after_seconds: retry_after(&response).unwrap_or(0),
                        }
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        Error::http_status(status.as_u16(), body)
                    }
                }
                Err(e) if e.is_timeout() => Error::Timeout {
                    timeout_ms: self.config.timeout.as_millis() as u64,
                },
                Err(e) => Error::Http(e),
            };

            let retryable = match &error {
                Error::Http(e) => e.is_connect(),
                other => other.is_retryable(),
            };
            if !retryable {
                return Err(error);
            }
            if attempt >= max_retries {
                return Err(Error::MaxRetriesExceeded {
                    max_retries,
                    last: Box::new(error),
                });
            }

            let delay = match &error {
                Error::RateLimited {
                    retry_after_seconds,
                } => Duration::from_secs(*retry_after_seconds)
                    .min(self.config.max_backoff)
                    .max(self.calculate_backoff(attempt)),
                _ => self.calculate_backoff(attempt),
            };
            warn!(
                "Request to {} failed ({}), attempt {}/{}, retrying in {:?}",
                url,
                error,
                attempt + 1,
                max_retries + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Calculate backoff delay for a given attempt
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        std::cmp::min(
            self.config.initial_backoff.saturating_mul(factor),
            self.config.max_backoff,
        )
    }
}

/// `Retry-After` in seconds, when the server sent one
fn retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Map a 404 on a shard resource to `ShardNotFound`
fn shard_gone(err: Error, logstore: &str, shard_id: ShardId) -> Error {
    match err {
        Error::HttpStatus { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            Error::ShardNotFound {
                logstore: logstore.to_string(),
                shard_id,
            }
        }
        other => other,
    }
}

#[async_trait]
impl LogClient for HttpLogClient {
    async fn list_shards(&self, project: &str, logstore: &str) -> Result<Vec<ShardMeta>> {
        let url = self.url(project, logstore, &["shards"])?;
        let response = self.send(Method::GET, url, &[], None).await?;
        let list: ShardListResponse = response.json().await?;
        Ok(list.shards)
    }

    async fn create_consumer_group(
        &self,
        project: &str,
        logstore: &str,
        group: &str,
    ) -> Result<()> {
        let url = self.url(project, logstore, &["consumergroups"])?;
        let body = json!({ "name": group });
        match self.send(Method::POST, url, &[], Some(&body)).await {
            Ok(_) => Ok(()),
            Err(Error::HttpStatus { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                debug!(group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn update_checkpoint(
        &self,
        project: &str,
        logstore: &str,
        group: &str,
        shard_id: ShardId,
        cursor: &str,
    ) -> Result<()> {
        let shard = shard_id.to_string();
        let url = self.url(project, logstore, &["consumergroups", group, "shards", &shard])?;
        let body = serde_json::to_value(CheckpointBody {
            checkpoint: Some(cursor.to_string()),
        })?;
        self.send(Method::PUT, url, &[], Some(&body)).await?;
        Ok(())
    }

    async fn fetch_checkpoint(
        &self,
        project: &str,
        logstore: &str,
        group: &str,
        shard_id: ShardId,
    ) -> Result<Option<String>> {
        let shard = shard_id.to_string();
        let url = self.url(project, logstore, &["consumergroups", group, "shards", &shard])?;
        match self.send(Method::GET, url, &[], None).await {
            Ok(response) => {
                let body: CheckpointBody = response.json().await?;
                Ok(body.checkpoint.filter(|c| !c.is_empty()))
            }
            Err(Error::HttpStatus { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_cursor(
        &self,
        project: &str,
        logstore: &str,
        shard_id: ShardId,
        position: CursorPosition,
    ) -> Result<String> {
        let shard = shard_id.to_string();
        let url = self.url(project, logstore, &["shards", &shard, "cursor"])?;
        let response = self
            .send(Method::GET, url, &[("from", position.as_query())], None)
            .await
            .map_err(|e| shard_gone(e, logstore, shard_id))?;
        let body: CursorResponse = response.json().await?;
        Ok(body.cursor)
    }

    async fn pull_logs(
        &self,
        project: &str,
        logstore: &str,
        shard_id: ShardId,
        cursor: &str,
        max_groups: u32,
    ) -> Result<PullResult> {
        let shard = shard_id.to_string();
        let url = self.url(project, logstore, &["shards", &shard, "logs"])?;
        let query = [
            ("cursor", cursor.to_string()),
            ("count", max_groups.to_string()),
        ];
        let response = self
            .send(Method::GET, url, &query, None)
            .await
            .map_err(|e| shard_gone(e, logstore, shard_id))?;
        Ok(response.json().await?)
    }

    async fn put_logs(&self, project: &str, logstore: &str, request: &PutLogsRequest) -> Result<()> {
        let url = self.url(project, logstore, &["logs"])?;
        let body = serde_json::to_value(request)?;
        self.send(Method::POST, url, &[], Some(&body)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpLogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLogClient")
            .field("base", &self.base.as_str())
            .field("config", &self.config)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}
