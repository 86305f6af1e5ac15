//! In-process union state

use super::types::{CursorEntry, UnionState, UnionStateFile, WriterSection};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Union state shared by all workers of one process
///
/// Clones made with `for_worker` share the backing union.
#[derive(Debug, Clone, Default)]
pub struct MemoryUnionState {
    writer: u32,
    union: Arc<RwLock<UnionStateFile>>,
}

impl MemoryUnionState {
    /// Create an empty union with a view for writer 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a union pre-filled with entries written by `writer`
    pub fn restored(writer: u32, entries: Vec<CursorEntry>) -> Self {
        let mut union = UnionStateFile::default();
        union.writers.insert(writer, WriterSection::with_entries(entries));
        Self {
            writer: 0,
            union: Arc::new(RwLock::new(union)),
        }
    }

    /// View of the same union for another worker
    pub fn for_worker(&self, writer: u32) -> Self {
        Self {
            writer,
            union: Arc::clone(&self.union),
        }
    }

    /// Writer index of this view
    pub fn writer(&self) -> u32 {
        self.writer
    }

    /// Entries written by this view's worker
    pub async fn own_entries(&self) -> Vec<CursorEntry> {
        self.union
            .read()
            .await
            .writers
            .get(&self.writer)
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UnionState for MemoryUnionState {
    async fn clear(&self) -> Result<()> {
        self.union.write().await.writers.remove(&self.writer);
        Ok(())
    }

    async fn stamp(&self, checkpoint_id: u64, worker_count: u32) -> Result<()> {
        let mut union = self.union.write().await;
        union.retain_workers(worker_count);
        let section = union.writers.entry(self.writer).or_default();
        section.checkpoint_id = Some(checkpoint_id);
        section.worker_count = Some(worker_count);
        section.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn add(&self, entry: CursorEntry) -> Result<()> {
        let mut union = self.union.write().await;
        let section = union.writers.entry(self.writer).or_default();
        section.updated_at = Some(Utc::now());
        section.entries.push(entry);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<CursorEntry>> {
        Ok(self.union.read().await.entries())
    }
}
