//! Main execution engine - drives one run through a pipeline's steps

use crate::{
    core::{ExecutionContext, PipelineError, PipelineRun, PipelineStep, RunStatus},
    persistence::PipelineStore,
    steps::StepRegistry,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        run_id: Uuid,
        order: u32,
        name: String,
        step_type: String,
    },
    StepCompleted {
        run_id: Uuid,
        order: u32,
        name: String,
    },
    StepFailed {
        run_id: Uuid,
        order: u32,
        name: String,
        error: String,
    },
    /// A line appended to the run log
    Log { run_id: Uuid, line: String },
    RunFinished { run_id: Uuid, status: RunStatus },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Runs pipelines step by step against one shared context
///
/// Every log line is written to the store as soon as it is produced so a
/// poller can follow a run live.
pub struct PipelineEngine {
    store: Arc<dyn PipelineStore>,
    registry: Arc<StepRegistry>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl PipelineEngine {
    pub fn new(store: Arc<dyn PipelineStore>, registry: Arc<StepRegistry>) -> Self {
        Self {
            store,
            registry,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Append a line to the run log and persist it immediately
    async fn log(&self, run: &mut PipelineRun, message: &str) -> Result<(), PipelineError> {
        let line = run.append_log(message);
        self.store.append_run_log(run.id, &line).await?;
        debug!("[run {}] {}", run.id, message);
        self.emit_event(ExecutionEvent::Log {
            run_id: run.id,
            line,
        })
        .await;
        Ok(())
    }

    /// Execute a pending run to completion
    ///
    /// Returns the run id on success. A failing step fails the run, is
    /// recorded in the run log and is returned; there is no retry.
    pub async fn run(&self, run_id: Uuid) -> Result<Uuid, PipelineError> {
        let mut run = match self.store.get_run(run_id).await? {
            Some(run) => run,
            None => {
                error!("Pipeline run {} not found", run_id);
                return Err(PipelineError::RunNotFound(run_id));
            }
        };

        run.transition(RunStatus::Running)?;
        self.store.update_run(&run).await?;
        info!("Starting pipeline run {} (pipeline {})", run.id, run.pipeline_id);

        // From here on every error ends the run as failed
        let outcome = match self.log(&mut run, "Starting pipeline execution...").await {
            Ok(()) => self.execute_steps(&mut run).await,
            Err(e) => Err(e),
        };
        let outcome = match outcome {
            Ok(()) => self.complete(&mut run).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!("Pipeline run {} completed", run_id);
                self.emit_event(ExecutionEvent::RunFinished {
                    run_id,
                    status: RunStatus::Completed,
                })
                .await;
                Ok(run_id)
            }
            Err(e) => {
                error!("Pipeline run {} failed: {}", run_id, e);
                if let Err(store_err) = self.mark_failed(&mut run, &e.to_string()).await {
                    error!("Could not record failure of run {}: {}", run_id, store_err);
                }
                self.emit_event(ExecutionEvent::RunFinished {
                    run_id,
                    status: RunStatus::Failed,
                })
                .await;
                Err(e)
            }
        }
    }

    /// Persist the completed run; `run` only changes once the store accepted it
    async fn complete(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
        let mut completed = run.clone();
        completed.transition(RunStatus::Completed)?;
        let line = completed.append_log("Pipeline execution completed successfully.");
        self.store.update_run(&completed).await?;
        *run = completed;
        self.emit_event(ExecutionEvent::Log { run_id: run.id, line }).await;
        Ok(())
    }

    async fn execute_steps(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
        let pipeline = self
            .store
            .get_pipeline(run.pipeline_id)
            .await?
            .ok_or(PipelineError::PipelineNotFound(run.pipeline_id))?;

        self.emit_event(ExecutionEvent::RunStarted {
            run_id: run.id,
            pipeline_name: pipeline.name.clone(),
            total_steps: pipeline.steps.len(),
        })
        .await;

        let mut context = ExecutionContext::new();
        for step in &pipeline.steps {
            self.execute_step(run, step, &mut context).await?;
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        run: &mut PipelineRun,
        step: &PipelineStep,
        context: &mut ExecutionContext,
    ) -> Result<(), PipelineError> {
        self.log(run, &format!("Executing step: {}", step.label())).await?;
        info!("Executing step {}: {}", step.order, step.label());
        self.emit_event(ExecutionEvent::StepStarted {
            run_id: run.id,
            order: step.order,
            name: step.name.clone(),
            step_type: step.step_type.to_string(),
        })
        .await;

        let outcome = match self.registry.get(&step.step_type) {
            Ok(handler) => handler
                .execute(context, &step.config)
                .await
                .map_err(|source| PipelineError::Step {
                    step: step.name.clone(),
                    source,
                }),
            Err(e) => Err(e),
        };

        for note in context.take_notes() {
            self.log(run, &note).await?;
        }

        match outcome {
            Ok(()) => {
                self.emit_event(ExecutionEvent::StepCompleted {
                    run_id: run.id,
                    order: step.order,
                    name: step.name.clone(),
                })
                .await;
                Ok(())
            }
            Err(e) => {
                warn!("Step {} ({}) failed: {}", step.order, step.name, e);
                self.emit_event(ExecutionEvent::StepFailed {
                    run_id: run.id,
                    order: step.order,
                    name: step.name.clone(),
                    error: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Move a run to failed with a final log line
    async fn mark_failed(&self, run: &mut PipelineRun, reason: &str) -> Result<(), PipelineError> {
        if run.status == RunStatus::Pending {
            run.transition(RunStatus::Running)?;
        }
        run.transition(RunStatus::Failed)?;
        let line = run.append_log(&format!("Pipeline failed: {}", reason));
        self.store.update_run(run).await?;
        self.emit_event(ExecutionEvent::Log { run_id: run.id, line }).await;
        Ok(())
    }

    /// Fail a run from outside the engine, e.g. when the dispatcher times it out
    ///
    /// A run that already finished is left untouched.
    pub async fn fail_run(&self, run_id: Uuid, reason: &str) -> Result<(), PipelineError> {
        let mut run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))?;

        if run.status.is_terminal() {
            debug!("Run {} already {}, not failing it", run_id, run.status);
            return Ok(());
        }

        self.mark_failed(&mut run, reason).await?;
        self.emit_event(ExecutionEvent::RunFinished {
            run_id,
            status: RunStatus::Failed,
        })
        .await;
        Ok(())
    }
}
