//! Pipeline execution: engine, single-step executor, dispatch and scheduling

pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod scheduler;

pub use dispatcher::{enqueue_run, Dispatcher, RunJob, TokioDispatcher};
pub use engine::{EventHandler, ExecutionEvent, PipelineEngine};
pub use executor::{StepExecutor, StepOverride, StepPreview};
pub use scheduler::{PipelineScheduler, ScheduleEvaluator, DEFAULT_POLL_INTERVAL};
