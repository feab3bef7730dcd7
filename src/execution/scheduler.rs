//! Pipeline scheduler - fires scheduled pipelines on a polling loop
//!
//! Each tick lists the scheduled pipelines, asks their schedule whether they
//! are due and, for those that are, creates a pending run (advancing
//! `last_run` in the same store transaction) before handing it to the
//! dispatcher. `last_run` moves before dispatch so a slow run never causes a
//! second trigger.

use crate::{
    core::Pipeline,
    execution::dispatcher::{Dispatcher, RunJob},
    persistence::PipelineStore,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default time between two ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Evaluates schedules and triggers due pipelines
pub struct ScheduleEvaluator {
    store: Arc<dyn PipelineStore>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ScheduleEvaluator {
    pub fn new(store: Arc<dyn PipelineStore>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Run one poll at `now`, returning the jobs that were submitted
    ///
    /// A failure for one pipeline is logged and does not stop the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<RunJob> {
        let pipelines = match self.store.list_scheduled_pipelines().await {
            Ok(pipelines) => pipelines,
            Err(e) => {
                error!("Failed to list scheduled pipelines: {:#}", e);
                return Vec::new();
            }
        };

        let mut triggered = Vec::new();
        for pipeline in pipelines {
            if !pipeline.schedule.is_due(pipeline.last_run, now) {
                continue;
            }
            match self.trigger(&pipeline, now).await {
                Ok(Some(job)) => triggered.push(job),
                Ok(None) => debug!("Pipeline '{}' was triggered concurrently", pipeline.name),
                Err(e) => error!("Failed to trigger pipeline '{}': {:#}", pipeline.name, e),
            }
        }
        triggered
    }

    async fn trigger(&self, pipeline: &Pipeline, now: DateTime<Utc>) -> Result<Option<RunJob>> {
        let Some(run) = self.store.trigger_scheduled_run(pipeline.id, now).await? else {
            return Ok(None);
        };
        let job = RunJob {
            pipeline_id: pipeline.id,
            run_id: run.id,
        };
        self.dispatcher.submit(job).await?;
        info!(
            "Scheduled run {} of pipeline '{}' ({})",
            run.id, pipeline.name, pipeline.schedule
        );
        Ok(Some(job))
    }
}

/// Background task ticking a [`ScheduleEvaluator`]
pub struct PipelineScheduler {
    evaluator: Arc<ScheduleEvaluator>,
    poll_interval: Duration,
    worker: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl PipelineScheduler {
    pub fn new(evaluator: ScheduleEvaluator) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Start polling; does nothing when already running
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            debug!("Scheduler already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let evaluator = self.evaluator.clone();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            info!("Scheduler started (poll every {:?})", poll_interval);
            loop {
                evaluator.tick(Utc::now()).await;
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Scheduler stopped");
        });

        *worker = Some((stop_tx, handle));
    }

    /// Stop polling and wait for the loop to exit; does nothing when stopped
    pub async fn stop(&self) {
        let Some((stop_tx, handle)) = self.worker.lock().await.take() else {
            return;
        };
        let _ = stop_tx.send(true);
        if let Err(e) = handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }
}
