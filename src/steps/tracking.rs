//! Experiment tracking used by training steps

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Trait for recording training runs, their parameters and metrics
#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Open a tracking run and return its id
    async fn start_run(&self, experiment: &str) -> Result<String>;

    async fn log_params(&self, run_id: &str, params: &Value) -> Result<()>;

    async fn log_metric(&self, run_id: &str, name: &str, value: f64) -> Result<()>;
}

/// Tracker that writes to the process log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracker;

#[async_trait]
impl ExperimentTracker for LogTracker {
    async fn start_run(&self, experiment: &str) -> Result<String> {
        let run_id = Uuid::new_v4().simple().to_string();
        tracing::info!("Tracking run {} started (experiment: {})", run_id, experiment);
        Ok(run_id)
    }

    async fn log_params(&self, run_id: &str, params: &Value) -> Result<()> {
        tracing::info!("[{}] params: {}", run_id, params);
        Ok(())
    }

    async fn log_metric(&self, run_id: &str, name: &str, value: f64) -> Result<()> {
        tracing::info!("[{}] {} = {}", run_id, name, value);
        Ok(())
    }
}
