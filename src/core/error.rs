//! Error taxonomy for the engine, step executor and step handlers

use crate::core::{state::RunStatus, table::TableError};
use thiserror::Error;
use uuid::Uuid;

/// Failure raised from inside a step handler
#[derive(Debug, Error)]
pub enum StepError {
    #[error("missing required context key '{key}'")]
    MissingInput { key: String },

    #[error("context key '{key}' does not hold {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("invalid step configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Table(#[from] TableError),

    /// Failure of the handler's external work (connectors, plugins, tracking)
    #[error("{0:#}")]
    Execution(#[from] anyhow::Error),
}

impl StepError {
    pub fn missing(key: &str) -> Self {
        StepError::MissingInput {
            key: key.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        StepError::InvalidConfig(message.into())
    }
}

/// Errors surfaced by the engine, the step executor and the scheduler
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline run {0} not found")]
    RunNotFound(Uuid),

    #[error("pipeline {0} not found")]
    PipelineNotFound(Uuid),

    #[error("pipeline '{0}' not found")]
    PipelineNameNotFound(String),

    #[error("no step with order {order}")]
    StepNotFound { order: u32 },

    #[error("unknown step type '{0}'")]
    UnknownStepType(String),

    #[error("previous step output not found (step {order} has no cached snapshot); run the previous steps first")]
    PreviousStepNotRun { order: u32 },

    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("invalid run status transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether this error came out of a step handler
    pub fn is_step_failure(&self) -> bool {
        matches!(self, PipelineError::Step { .. })
    }
}
