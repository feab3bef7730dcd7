//! Pipeline configuration from YAML

use crate::core::{
    pipeline::PipelineDefinition,
    schedule::{Schedule, ScheduleTime},
    step::{PipelineStep, StepType},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, unique within a store
    pub name: String,

    /// Optional free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Automatic trigger (omitted = disabled)
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,

    /// Pipeline steps
    pub steps: Vec<StepConfig>,
}

/// Schedule block as written in YAML
///
/// ```yaml
/// schedule:
///   mode: daily      # disabled | daily | interval
///   time: "02:30"    # daily only, UTC
///   interval_secs: 3600  # interval only
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub mode: String,

    #[serde(default)]
    pub time: Option<String>,

    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Human-readable step name
    pub name: String,

    /// Step type (`extraction`, `preprocessing`, `training`, `prediction`, `save`, or custom)
    #[serde(rename = "type")]
    pub step_type: String,

    /// Explicit order; defaults to the position in the list
    #[serde(default)]
    pub order: Option<u32>,

    /// Handler configuration, passed through untouched
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ScheduleConfig {
    pub fn to_schedule(&self) -> Result<Schedule> {
        match self.mode.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(Schedule::Disabled),
            "daily" => {
                let raw = self
                    .time
                    .as_deref()
                    .context("daily schedule requires 'time' (HH:MM)")?;
                let time: ScheduleTime = raw.parse()?;
                Ok(Schedule::Daily { time })
            }
            "interval" => match self.interval_secs {
                Some(secs) if secs > 0 => Ok(Schedule::Interval { every_secs: secs }),
                Some(_) => anyhow::bail!("interval_secs must be greater than zero"),
                None => anyhow::bail!("interval schedule requires 'interval_secs'"),
            },
            other => anyhow::bail!("Unknown schedule mode: {}", other),
        }
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        // Check that all step orders are unique
        let mut seen_orders = HashSet::new();
        for (position, step) in self.steps.iter().enumerate() {
            let order = step.order.unwrap_or(position as u32);
            if !seen_orders.insert(order) {
                anyhow::bail!("Duplicate step order {} (step '{}')", order, step.name);
            }
            if step.name.trim().is_empty() {
                anyhow::bail!("Step at position {} has an empty name", position);
            }
            if step.step_type.trim().is_empty() {
                anyhow::bail!("Step '{}' has an empty type", step.name);
            }
        }

        if let Some(schedule) = &self.schedule {
            schedule
                .to_schedule()
                .with_context(|| format!("Invalid schedule for pipeline '{}'", self.name))?;
        }

        Ok(())
    }

    pub fn schedule(&self) -> Result<Schedule> {
        match &self.schedule {
            Some(schedule) => schedule.to_schedule(),
            None => Ok(Schedule::Disabled),
        }
    }

    /// Convert config to a pipeline definition
    pub fn to_definition(&self) -> Result<PipelineDefinition> {
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(position, step)| {
                PipelineStep::new(
                    step.name.clone(),
                    StepType::parse(&step.step_type),
                    step.order.unwrap_or(position as u32),
                    step.config.clone(),
                )
            })
            .collect();

        Ok(PipelineDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            schedule: self.schedule()?,
            steps,
        })
    }
}
