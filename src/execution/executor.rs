//! Step executor - runs a single step in isolation for interactive testing
//!
//! Each step starts from the snapshot the previous step left in the step
//! cache and leaves its own snapshot behind, so a pipeline can be walked one
//! step at a time without creating runs.

use crate::{
    core::{keys, ContextValue, ExecutionContext, PipelineError, PipelineStep, StepType},
    persistence::{PipelineStore, StepCache},
    steps::StepRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Rows included in a table preview
const PREVIEW_ROWS: usize = 5;

/// Ad-hoc step definition used instead of the stored one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOverride {
    /// Defaults to "Test Step"
    #[serde(default)]
    pub name: Option<String>,

    pub step_type: StepType,

    #[serde(default)]
    pub config: Value,
}

impl StepOverride {
    pub fn new(step_type: StepType, config: Value) -> Self {
        Self {
            name: None,
            step_type,
            config,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn into_step(self, order: u32) -> PipelineStep {
        PipelineStep::new(
            self.name.unwrap_or_else(|| "Test Step".to_string()),
            self.step_type,
            order,
            self.config,
        )
    }
}

/// What a tested step produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepPreview {
    /// First rows of the `data` table
    Table {
        rows: usize,
        columns: Vec<String>,
        data: Vec<Map<String, Value>>,
    },
    /// Outcome of a training step
    #[serde(rename = "json")]
    Summary {
        message: String,
        run_id: Option<String>,
        model_type: String,
    },
    Text { message: String },
}

impl StepPreview {
    /// Build the preview for a step of `step_type` from its resulting context
    pub fn from_context(step_type: &StepType, context: &ExecutionContext) -> Self {
        match step_type {
            StepType::Extraction | StepType::Preprocessing | StepType::Prediction => {
                if let Ok(table) = context.table(keys::DATA) {
                    return StepPreview::Table {
                        rows: table.len(),
                        columns: table.columns().to_vec(),
                        data: table.head(PREVIEW_ROWS),
                    };
                }
            }
            StepType::Training => {
                let model_type = match context.get(keys::MODEL) {
                    Some(ContextValue::Model(model)) => model.type_name().to_string(),
                    _ => "Unknown".to_string(),
                };
                let run_id = match context.get(keys::RUN_ID) {
                    Some(ContextValue::Text(id)) => Some(id.clone()),
                    _ => None,
                };
                return StepPreview::Summary {
                    message: "Training completed successfully.".to_string(),
                    run_id,
                    model_type,
                };
            }
            _ => {}
        }
        StepPreview::Text {
            message: "Step completed successfully.".to_string(),
        }
    }
}

/// Runs single steps of one pipeline against cached snapshots
pub struct StepExecutor {
    pipeline_id: Uuid,
    store: Arc<dyn PipelineStore>,
    registry: Arc<StepRegistry>,
    cache: Arc<dyn StepCache>,
}

impl StepExecutor {
    pub fn new(
        pipeline_id: Uuid,
        store: Arc<dyn PipelineStore>,
        registry: Arc<StepRegistry>,
        cache: Arc<dyn StepCache>,
    ) -> Self {
        Self {
            pipeline_id,
            store,
            registry,
            cache,
        }
    }

    /// Run the step at `step_order` (or `step_override` in its place)
    ///
    /// Running the same step twice with unchanged inputs overwrites its
    /// snapshot with an equivalent one.
    pub async fn run_step(
        &self,
        step_order: u32,
        step_override: Option<StepOverride>,
    ) -> Result<StepPreview, PipelineError> {
        let pipeline = self
            .store
            .get_pipeline(self.pipeline_id)
            .await?
            .ok_or(PipelineError::PipelineNotFound(self.pipeline_id))?;

        let step = match step_override {
            Some(step_override) => step_override.into_step(step_order),
            None => pipeline
                .step(step_order)
                .cloned()
                .ok_or(PipelineError::StepNotFound { order: step_order })?,
        };

        let mut context = self.initial_context(&step).await?;

        info!("Testing step {} of pipeline {}: {}", step_order, pipeline.name, step.label());
        let handler = self.registry.get(&step.step_type)?;
        handler
            .execute(&mut context, &step.config)
            .await
            .map_err(|source| PipelineError::Step {
                step: step.name.clone(),
                source,
            })?;

        for note in context.take_notes() {
            debug!("[{}] {}", step.name, note);
        }

        self.cache
            .store(self.pipeline_id, step_order, &context)
            .await?;

        Ok(StepPreview::from_context(&step.step_type, &context))
    }

    /// Context the step starts from: empty for the first step, otherwise the
    /// previous step's snapshot
    async fn initial_context(&self, step: &PipelineStep) -> Result<ExecutionContext, PipelineError> {
        if step.order == 0 {
            return Ok(ExecutionContext::new());
        }

        match self.cache.load(self.pipeline_id, step.order - 1).await? {
            Some(context) => Ok(context),
            None if step.step_type == StepType::Extraction => Ok(ExecutionContext::new()),
            None => Err(PipelineError::PreviousStepNotRun { order: step.order - 1 }),
        }
    }

    /// Drop every snapshot of this pipeline
    pub async fn clear_cache(&self) -> Result<usize, PipelineError> {
        Ok(self.cache.clear(self.pipeline_id).await?)
    }
}
