//! Step snapshot cache for interactive step testing
//!
//! A snapshot is the execution context right after a step ran, keyed by
//! `(pipeline_id, step_order)`. Snapshots are derived data: nothing
//! invalidates them automatically and wiping them is always safe.
//!
//! Concurrent `run_step` calls on the same pipeline may read and overwrite
//! each other's snapshots (last writer wins). One tester per pipeline is
//! assumed.

use crate::core::context::ExecutionContext;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for snapshot storage
#[async_trait::async_trait]
pub trait StepCache: Send + Sync {
    /// Snapshot taken after step `order`, if any
    async fn load(&self, pipeline_id: Uuid, order: u32) -> Result<Option<ExecutionContext>>;

    /// Save (overwrite) the snapshot for step `order`
    async fn store(&self, pipeline_id: Uuid, order: u32, context: &ExecutionContext) -> Result<()>;

    /// Remove every snapshot of a pipeline, returning how many were removed
    async fn clear(&self, pipeline_id: Uuid) -> Result<usize>;
}

/// One JSON file per snapshot under a cache directory
pub struct FileStepCache {
    dir: PathBuf,
}

impl FileStepCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prefix(pipeline_id: Uuid) -> String {
        format!("pipeline_{}_step_", pipeline_id)
    }

    fn path(&self, pipeline_id: Uuid, order: u32) -> PathBuf {
        self.dir
            .join(format!("{}{}.json", Self::prefix(pipeline_id), order))
    }
}

#[async_trait::async_trait]
impl StepCache for FileStepCache {
    async fn load(&self, pipeline_id: Uuid, order: u32) -> Result<Option<ExecutionContext>> {
        let path = self.path(pipeline_id, order);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read snapshot {}", path.display()))
            }
        };
        let context = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt snapshot {}", path.display()))?;
        Ok(Some(context))
    }

    async fn store(&self, pipeline_id: Uuid, order: u32, context: &ExecutionContext) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;

        let path = self.path(pipeline_id, order);
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let content = serde_json::to_vec(context)?;

        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write snapshot {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;

        tracing::debug!("Cached step {} of pipeline {} at {}", order, pipeline_id, path.display());
        Ok(())
    }

    async fn clear(&self, pipeline_id: Uuid) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let prefix = Self::prefix(pipeline_id);
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-memory snapshots (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryStepCache {
    snapshots: RwLock<HashMap<(Uuid, u32), String>>,
}

impl InMemoryStepCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StepCache for InMemoryStepCache {
    async fn load(&self, pipeline_id: Uuid, order: u32) -> Result<Option<ExecutionContext>> {
        let snapshots = self.snapshots.read().await;
        match snapshots.get(&(pipeline_id, order)) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, pipeline_id: Uuid, order: u32, context: &ExecutionContext) -> Result<()> {
        let json = serde_json::to_string(context)?;
        self.snapshots.write().await.insert((pipeline_id, order), json);
        Ok(())
    }

    async fn clear(&self, pipeline_id: Uuid) -> Result<usize> {
        let mut snapshots = self.snapshots.write().await;
        let before = snapshots.len();
        snapshots.retain(|(id, _), _| *id != pipeline_id);
        Ok(before - snapshots.len())
    }
}
