//! Send completion callbacks

use crate::error::Result;
use tracing::{debug, warn};

/// What a send was about, handed to its callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendContext {
    /// Project
    pub project: String,
    /// Logstore
    pub logstore: String,
    /// Topic
    pub topic: Option<String>,
    /// Source
    pub source: Option<String>,
    /// Shard hash key
    pub hash_key: Option<String>,
    /// Number of logs in the send
    pub log_count: usize,
}

/// Completion hook of one send
pub trait SendCallback: Send {
    /// Called once, when the batch holding the send was written or failed
    fn on_complete(self: Box<Self>, result: &Result<()>);
}

/// Creates a fresh callback for every send
pub trait CallbackFactory: Send + Sync {
    /// Create the callback of one send
    fn create(&self, context: SendContext) -> Box<dyn SendCallback>;
}

/// Default factory: logs the outcome of every send
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCallbackFactory;

struct LoggingCallback {
    context: SendContext,
}

impl SendCallback for LoggingCallback {
    fn on_complete(self: Box<Self>, result: &Result<()>) {
        let ctx = &self.context;
        match result {
            Ok(()) => debug!(
                project = %ctx.project,
                logstore = %ctx.logstore,
                logs = ctx.log_count,
                "Logs sent"
            ),
            Err(e) => warn!(
                "Failed to send {} logs to {}/{} (topic {:?}, hash key {:?}): {}",
                ctx.log_count, ctx.project, ctx.logstore, ctx.topic, ctx.hash_key, e
            ),
        }
    }
}

impl CallbackFactory for LoggingCallbackFactory {
    fn create(&self, context: SendContext) -> Box<dyn SendCallback> {
        Box::new(LoggingCallback { context })
    }
}
