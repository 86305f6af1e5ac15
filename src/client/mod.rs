//! Log service client module
//!
//! Everything the connector needs from the remote log service goes through
//! the `LogClient` trait: shard listing, consumer group checkpoints, cursor
//! lookup, pulling and putting logs.
//!
//! # Implementations
//!
//! - **HttpLogClient**: JSON over HTTP with retries, backoff and rate limiting
//! - **InMemoryLogClient**: Process-local log service for tests and demos

mod http;
mod memory;
mod rate_limit;
mod types;

pub use http::{HttpLogClient, HttpLogClientConfig};
pub use memory::{CheckpointUpdate, InMemoryLogClient};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use types::{CursorPosition, LogClient, PullResult, PutLogsRequest};

#[cfg(test)]
mod tests;
