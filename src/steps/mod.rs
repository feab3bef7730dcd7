//! Step handlers - the units of work a pipeline sequences
//!
//! The engine only knows the [`StepHandler`] trait. Built-in handlers for the
//! five standard step types live in the submodules; custom step types are
//! added with [`StepRegistry::register`].

pub mod connectors;
pub mod extraction;
pub mod models;
pub mod plugins;
pub mod prediction;
pub mod preprocessing;
pub mod save;
pub mod tracking;
pub mod training;

use crate::core::{context::ExecutionContext, error::PipelineError, error::StepError, step::StepType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use connectors::{ConnectorRegistry, DataConnector, MemoryConnector};
pub use models::{Model, TaskType};
pub use plugins::{FittedPreprocessor, PreprocessorPlugin, PreprocessorRegistry};
pub use tracking::{ExperimentTracker, LogTracker};

/// Trait for step execution - one implementation per step type
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Run the step against the shared context
    ///
    /// Handlers check the keys they need and fail with `MissingInput`
    /// before doing any work.
    async fn execute(&self, context: &mut ExecutionContext, config: &Value) -> Result<(), StepError>;
}

/// Shared collaborators of the built-in handlers
#[derive(Clone)]
pub struct StepServices {
    pub connectors: Arc<ConnectorRegistry>,
    pub preprocessors: Arc<PreprocessorRegistry>,
    pub tracker: Arc<dyn ExperimentTracker>,
}

impl Default for StepServices {
    fn default() -> Self {
        Self {
            connectors: Arc::new(ConnectorRegistry::with_builtins()),
            preprocessors: Arc::new(PreprocessorRegistry::with_builtins()),
            tracker: Arc::new(LogTracker),
        }
    }
}

impl StepServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connectors(mut self, connectors: ConnectorRegistry) -> Self {
        self.connectors = Arc::new(connectors);
        self
    }

    pub fn with_preprocessors(mut self, preprocessors: Arc<PreprocessorRegistry>) -> Self {
        self.preprocessors = preprocessors;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ExperimentTracker>) -> Self {
        self.tracker = tracker;
        self
    }
}

/// Maps step types to their handlers
#[derive(Default, Clone)]
pub struct StepRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the five built-in step types wired to `services`
    pub fn with_builtins(services: StepServices) -> Self {
        let mut registry = Self::new();
        registry.register(
            StepType::Extraction,
            Arc::new(extraction::ExtractionStep::new(services.connectors.clone())),
        );
        registry.register(
            StepType::Preprocessing,
            Arc::new(preprocessing::PreprocessingStep::new(services.preprocessors.clone())),
        );
        registry.register(
            StepType::Training,
            Arc::new(training::TrainingStep::new(services.tracker.clone())),
        );
        registry.register(
            StepType::Prediction,
            Arc::new(prediction::PredictionStep::new(services.preprocessors.clone())),
        );
        registry.register(StepType::Save, Arc::new(save::SaveStep::new(services.connectors)));
        registry
    }

    /// Register (or replace) the handler for a step type
    pub fn register(&mut self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type, handler);
    }

    pub fn contains(&self, step_type: &StepType) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Resolve the handler for a step type
    pub fn get(&self, step_type: &StepType) -> Result<Arc<dyn StepHandler>, PipelineError> {
        self.handlers
            .get(step_type)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownStepType(step_type.to_string()))
    }
}

/// Read a required string field from a step config
pub(crate) fn config_str<'a>(config: &'a Value, field: &str) -> Result<&'a str, StepError> {
    config
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| StepError::config(format!("'{}' is required", field)))
}

/// Read a required object field from a step config
pub(crate) fn config_object<'a>(config: &'a Value, field: &str) -> Result<&'a Value, StepError> {
    match config.get(field) {
        Some(value) if value.is_object() => Ok(value),
        _ => Err(StepError::config(format!("'{}' must be an object", field))),
    }
}
