//! Run state models

use crate::core::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run record created, engine not started yet
    Pending,
    /// Engine is executing steps
    Running,
    /// All steps finished
    Completed,
    /// A step (or the engine) failed
    Failed,
}

impl RunStatus {
    /// Check if the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Allowed moves: pending -> running -> completed | failed
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => anyhow::bail!("unknown run status '{}'", other),
        }
    }
}

/// One execution attempt of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run ID
    pub id: Uuid,

    /// Pipeline this run belongs to
    pub pipeline_id: Uuid,

    /// Current status
    pub status: RunStatus,

    /// Append-only, timestamped log lines
    pub logs: String,

    /// When the run record was created
    pub created_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a new pending run
    pub fn new(pipeline_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            status: RunStatus::Pending,
            logs: String::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to `next`, stamping `completed_at` on a terminal status
    pub fn transition(&mut self, next: RunStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Append a timestamped line to the logs and return it
    pub fn append_log(&mut self, message: &str) -> String {
        let line = format_log_line(Utc::now(), message);
        self.logs.push_str(&line);
        line
    }

    /// Wall-clock duration of a finished run
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at
            .map(|completed| completed.signed_duration_since(self.created_at))
    }
}

/// Format one run log line: `[YYYY-MM-DD HH:MM:SS] message\n`
pub fn format_log_line(at: DateTime<Utc>, message: &str) -> String {
    format!("[{}] {}\n", at.format("%Y-%m-%d %H:%M:%S"), message)
}
