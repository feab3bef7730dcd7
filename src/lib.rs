//! mlpipe - scheduled ML pipelines of typed, ordered steps

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod settings;
pub mod steps;

// Re-export commonly used types
pub use core::{
    ContextValue, ExecutionContext, Pipeline, PipelineDefinition, PipelineError, PipelineRun,
    PipelineStep, RunStatus, Schedule, StepError, StepType, Table,
};
pub use execution::{
    enqueue_run, Dispatcher, ExecutionEvent, PipelineEngine, PipelineScheduler, RunJob,
    ScheduleEvaluator, StepExecutor, StepOverride, StepPreview, TokioDispatcher,
};
pub use persistence::{InMemoryStore, PipelineStore, StepCache};
pub use settings::Settings;
pub use steps::{StepHandler, StepRegistry, StepServices};
