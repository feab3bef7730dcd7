//! Task dispatch - hands runs to asynchronous execution off the caller's task

use crate::{execution::engine::PipelineEngine, persistence::PipelineStore};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One pending run waiting to be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunJob {
    pub pipeline_id: Uuid,
    pub run_id: Uuid,
}

/// Execution boundary between whoever creates runs and the engine
///
/// `submit` must return without waiting for the run to finish.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn submit(&self, job: RunJob) -> Result<()>;
}

/// In-process dispatcher running each job on its own tokio task
pub struct TokioDispatcher {
    engine: Arc<PipelineEngine>,
    permits: Arc<Semaphore>,
    run_timeout: Option<Duration>,
    tasks: Mutex<JoinSet<()>>,
}

impl TokioDispatcher {
    pub fn new(engine: Arc<PipelineEngine>, max_concurrent_runs: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            run_timeout: None,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Fail runs that take longer than `timeout`
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Wait until every submitted job has finished
    ///
    /// Jobs submitted while draining are waited for as well; the task lock is
    /// only held long enough to take the current set.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Dispatched run task panicked: {}", e);
                }
            }
        }
    }

    async fn execute(engine: Arc<PipelineEngine>, job: RunJob, run_timeout: Option<Duration>) {
        let outcome = match run_timeout {
            Some(limit) => match tokio::time::timeout(limit, engine.run(job.run_id)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Run {} exceeded {:?}, failing it", job.run_id, limit);
                    let reason = format!("run timed out after {}s", limit.as_secs());
                    if let Err(e) = engine.fail_run(job.run_id, &reason).await {
                        error!("Could not fail timed out run {}: {}", job.run_id, e);
                    }
                    return;
                }
            },
            None => engine.run(job.run_id).await,
        };

        match outcome {
            Ok(run_id) => debug!("Dispatched run {} finished", run_id),
            Err(e) => error!("Dispatched run {} of pipeline {} failed: {}", job.run_id, job.pipeline_id, e),
        }
    }
}

#[async_trait::async_trait]
impl Dispatcher for TokioDispatcher {
    async fn submit(&self, job: RunJob) -> Result<()> {
        let engine = self.engine.clone();
        let permits = self.permits.clone();
        let run_timeout = self.run_timeout;

        let mut tasks = self.tasks.lock().await;
        // Reap finished tasks so a long-lived dispatcher does not grow
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("Dispatcher closed before run {} could start", job.run_id);
                    return;
                }
            };
            Self::execute(engine, job, run_timeout).await;
        });
        debug!("Submitted run {} of pipeline {}", job.run_id, job.pipeline_id);
        Ok(())
    }
}

/// Create a pending run for a pipeline and submit it ("run now")
pub async fn enqueue_run(
    store: &dyn PipelineStore,
    dispatcher: &dyn Dispatcher,
    pipeline_id: Uuid,
) -> Result<RunJob> {
    let run = store.create_run(pipeline_id).await?;
    let job = RunJob {
        pipeline_id,
        run_id: run.id,
    };
    dispatcher.submit(job).await?;
    info!("Queued run {} of pipeline {}", run.id, pipeline_id);
    Ok(job)
}
