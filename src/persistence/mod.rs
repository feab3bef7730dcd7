//! Persistence layer for pipelines, runs and step snapshots

pub mod cache;

#[cfg(feature = "sqlite")]
pub mod store;

pub use cache::{FileStepCache, InMemoryStepCache, StepCache};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::{Pipeline, PipelineDefinition, PipelineRun};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for pipeline and run storage
#[async_trait::async_trait]
pub trait PipelineStore: Send + Sync {
    /// Create a pipeline; names are unique
    async fn create_pipeline(&self, definition: PipelineDefinition) -> Result<Pipeline>;

    /// Replace the definition of an existing pipeline, keeping its id, `last_run` and runs
    async fn update_pipeline(&self, id: Uuid, definition: PipelineDefinition) -> Result<Pipeline>;

    async fn get_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>>;

    /// Look a pipeline up by name
    async fn find_pipeline(&self, name: &str) -> Result<Option<Pipeline>>;

    /// All pipelines, by name
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;

    /// Pipelines whose schedule is not disabled
    async fn list_scheduled_pipelines(&self) -> Result<Vec<Pipeline>>;

    /// Delete a pipeline with its steps and runs; false if it did not exist
    async fn delete_pipeline(&self, id: Uuid) -> Result<bool>;

    /// Create a pending run
    async fn create_run(&self, pipeline_id: Uuid) -> Result<PipelineRun>;

    async fn get_run(&self, id: Uuid) -> Result<Option<PipelineRun>>;

    /// Persist status, `completed_at` and logs of a run
    async fn update_run(&self, run: &PipelineRun) -> Result<()>;

    /// Append one already formatted line to a run's logs
    async fn append_run_log(&self, run_id: Uuid, line: &str) -> Result<()>;

    /// Runs of a pipeline, newest first
    async fn list_runs(&self, pipeline_id: Uuid, limit: Option<usize>) -> Result<Vec<PipelineRun>>;

    /// If the pipeline is due at `now`, create a pending run and set
    /// `last_run = now` in one atomic step
    ///
    /// Returns `None` when the schedule is not (or no longer) due, so two
    /// racing triggers for the same instant create a single run.
    async fn trigger_scheduled_run(
        &self,
        pipeline_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PipelineRun>>;
}

/// In-memory store (for testing or ephemeral use)
pub struct InMemoryStore {
    pipelines: RwLock<HashMap<Uuid, Pipeline>>,
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PipelineStore for InMemoryStore {
    async fn create_pipeline(&self, definition: PipelineDefinition) -> Result<Pipeline> {
        definition.validate()?;
        let mut pipelines = self.pipelines.write().await;
        if pipelines.values().any(|p| p.name == definition.name) {
            anyhow::bail!("Pipeline '{}' already exists", definition.name);
        }
        let pipeline = Pipeline::from_definition(definition);
        pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn update_pipeline(&self, id: Uuid, definition: PipelineDefinition) -> Result<Pipeline> {
        definition.validate()?;
        let mut pipelines = self.pipelines.write().await;
        if pipelines
            .values()
            .any(|p| p.id != id && p.name == definition.name)
        {
            anyhow::bail!("Pipeline '{}' already exists", definition.name);
        }
        let pipeline = pipelines
            .get_mut(&id)
            .with_context(|| format!("Pipeline {} not found", id))?;
        pipeline.apply(definition);
        Ok(pipeline.clone())
    }

    async fn get_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>> {
        Ok(self.pipelines.read().await.get(&id).cloned())
    }

    async fn find_pipeline(&self, name: &str) -> Result<Option<Pipeline>> {
        let pipelines = self.pipelines.read().await;
        Ok(pipelines.values().find(|p| p.name == name).cloned())
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let mut result: Vec<_> = self.pipelines.read().await.values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn list_scheduled_pipelines(&self) -> Result<Vec<Pipeline>> {
        let mut result = self.list_pipelines().await?;
        result.retain(|p| p.schedule.is_enabled());
        Ok(result)
    }

    async fn delete_pipeline(&self, id: Uuid) -> Result<bool> {
        let mut pipelines = self.pipelines.write().await;
        let mut runs = self.runs.write().await;
        let existed = pipelines.remove(&id).is_some();
        runs.retain(|_, run| run.pipeline_id != id);
        Ok(existed)
    }

    async fn create_run(&self, pipeline_id: Uuid) -> Result<PipelineRun> {
        let pipelines = self.pipelines.read().await;
        if !pipelines.contains_key(&pipeline_id) {
            anyhow::bail!("Pipeline {} not found", pipeline_id);
        }
        let run = PipelineRun::new(pipeline_id);
        self.runs.write().await.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn update_run(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        let stored = runs
            .get_mut(&run.id)
            .with_context(|| format!("Run {} not found", run.id))?;
        stored.status = run.status;
        stored.completed_at = run.completed_at;
        stored.logs = run.logs.clone();
        Ok(())
    }

    async fn append_run_log(&self, run_id: Uuid, line: &str) -> Result<()> {
        let mut runs = self.runs.write().await;
        let stored = runs
            .get_mut(&run_id)
            .with_context(|| format!("Run {} not found", run_id))?;
        stored.logs.push_str(line);
        Ok(())
    }

    async fn list_runs(&self, pipeline_id: Uuid, limit: Option<usize>) -> Result<Vec<PipelineRun>> {
        let runs = self.runs.read().await;
        let mut result: Vec<_> = runs
            .values()
            .filter(|run| run.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    async fn trigger_scheduled_run(
        &self,
        pipeline_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PipelineRun>> {
        let mut pipelines = self.pipelines.write().await;
        let mut runs = self.runs.write().await;
        let pipeline = pipelines
            .get_mut(&pipeline_id)
            .with_context(|| format!("Pipeline {} not found", pipeline_id))?;
        if !pipeline.schedule.is_due(pipeline.last_run, now) {
            return Ok(None);
        }

        let run = PipelineRun::new(pipeline_id);
        runs.insert(run.id, run.clone());
        pipeline.last_run = Some(now);
        Ok(Some(run))
    }
}
