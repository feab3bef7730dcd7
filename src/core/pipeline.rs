//! Pipeline domain model

use crate::core::{error::PipelineError, schedule::Schedule, step::PipelineStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// What a user defines: name, schedule and steps
///
/// Used to create a pipeline or replace the definition of an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub schedule: Schedule,

    pub steps: Vec<PipelineStep>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<PipelineStep>) -> Self {
        Self {
            name: name.into(),
            description: None,
            schedule: Schedule::Disabled,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::InvalidDefinition(
                "pipeline name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.order) {
                return Err(PipelineError::InvalidDefinition(format!(
                    "duplicate step order {} in pipeline '{}'",
                    step.order, self.name
                )));
            }
            if step.name.trim().is_empty() {
                return Err(PipelineError::InvalidDefinition(format!(
                    "step {} has an empty name",
                    step.order
                )));
            }
        }

        if let Schedule::Interval { every_secs } = self.schedule {
            if every_secs == 0 {
                return Err(PipelineError::InvalidDefinition(
                    "interval schedule must be at least one second".to_string(),
                ));
            }
            if i64::try_from(every_secs).is_err() {
                return Err(PipelineError::InvalidDefinition(format!(
                    "interval schedule of {}s is too large",
                    every_secs
                )));
            }
        }

        Ok(())
    }
}

/// A stored pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,

    /// Unique pipeline name
    pub name: String,

    pub description: Option<String>,

    pub schedule: Schedule,

    /// Last time the scheduler triggered this pipeline
    pub last_run: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// Steps, sorted by ascending `order`
    pub steps: Vec<PipelineStep>,
}

impl Pipeline {
    /// Create a new pipeline from a definition
    pub fn from_definition(definition: PipelineDefinition) -> Self {
        let mut pipeline = Self {
            id: Uuid::new_v4(),
            name: String::new(),
            description: None,
            schedule: Schedule::Disabled,
            last_run: None,
            created_at: Utc::now(),
            steps: Vec::new(),
        };
        pipeline.apply(definition);
        pipeline
    }

    /// Replace name, description, schedule and steps, keeping id and history
    pub fn apply(&mut self, definition: PipelineDefinition) {
        self.name = definition.name;
        self.description = definition.description;
        self.schedule = definition.schedule;
        self.steps = definition.steps;
        self.sort_steps();
    }

    pub fn sort_steps(&mut self) {
        self.steps.sort_by_key(|step| step.order);
    }

    /// Get a step by its order
    pub fn step(&self, order: u32) -> Option<&PipelineStep> {
        self.steps.iter().find(|step| step.order == order)
    }

    pub fn definition(&self) -> PipelineDefinition {
        PipelineDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            schedule: self.schedule,
            steps: self.steps.clone(),
        }
    }
}
