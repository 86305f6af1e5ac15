//! File-backed union state
//!
//! All workers of a deployment point at the same JSON file. Each worker
//! keeps its own section in memory and `persist` merges it into the file
//! with a temp-file + rename write. A stamped section drops the sections of
//! writers outside its deployment. Concurrent persists from different
//! processes are last-writer-wins per file, so hosts that run several
//! processes should serialize checkpoints.

use super::types::{CursorEntry, UnionState, UnionStateFile, WriterSection};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Union state stored in a JSON file
#[derive(Debug)]
pub struct FileUnionState {
    path: PathBuf,
    writer: u32,
    /// Contents as of open, with this writer's pending section applied
    union: RwLock<UnionStateFile>,
    restored: bool,
}

impl FileUnionState {
    /// Open the union at `path` as worker `writer`.
    ///
    /// A missing file is an empty, non-restored union.
    pub async fn open(path: impl AsRef<Path>, writer: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let union = load(&path).await?;
        let restored = union.is_some();

        Ok(Self {
            path,
            writer,
            union: RwLock::new(union.unwrap_or_default()),
            restored,
        })
    }

    /// Whether the file held a previous checkpoint when opened
    pub fn was_restored(&self) -> bool {
        self.restored
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents, as seen by this worker
    pub async fn contents(&self) -> UnionStateFile {
        self.union.read().await.clone()
    }
}

async fn load(path: &Path) -> Result<Option<UnionStateFile>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;

    let union = serde_json::from_str(&contents)
        .map_err(|e| Error::state(format!("Failed to parse state file: {e}")))?;
    Ok(Some(union))
}

#[async_trait]
impl UnionState for FileUnionState {
    async fn clear(&self) -> Result<()> {
        self.union.write().await.writers.remove(&self.writer);
        Ok(())
    }

    async fn stamp(&self, checkpoint_id: u64, worker_count: u32) -> Result<()> {
        let mut union = self.union.write().await;
        let section = union.writers.entry(self.writer).or_default();
        section.checkpoint_id = Some(checkpoint_id);
        section.worker_count = Some(worker_count);
        Ok(())
    }

    async fn add(&self, entry: CursorEntry) -> Result<()> {
        let mut union = self.union.write().await;
        union
            .writers
            .entry(self.writer)
            .or_default()
            .entries
            .push(entry);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<CursorEntry>> {
        Ok(self.union.read().await.entries())
    }

    async fn persist(&self) -> Result<()> {
        let mut union = self.union.write().await;

        // Pick up sections other workers persisted since we opened
        let mut merged = load(&self.path).await?.unwrap_or_default();
        let own = union.writers.get(&self.writer).map_or_else(
            WriterSection::default,
            |section| WriterSection {
                updated_at: Some(Utc::now()),
                ..section.clone()
            },
        );
        if let Some(count) = own.worker_count {
            merged.retain_workers(count);
        }
        merged.writers.insert(self.writer, own);

        let contents = serde_json::to_string_pretty(&merged)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension(format!("{}.tmp", self.writer));
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::state(format!("Failed to write state file: {e}")))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::state(format!("Failed to rename state file: {e}")))?;

        debug!(
            path = %self.path.display(),
            writer = self.writer,
            entries = merged.writers.get(&self.writer).map_or(0, |s| s.entries.len()),
            "Persisted union state"
        );
        *union = merged;
        Ok(())
    }
}
