//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Create or update a pipeline
#[derive(Debug, Args, Clone)]
pub struct ApplyCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List stored pipelines
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run a pipeline synchronously
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Pipeline name
    #[arg(short, long)]
    pub pipeline: String,
}

/// Run one step in isolation
#[derive(Debug, Args, Clone)]
pub struct TestStepCommand {
    /// Pipeline name
    #[arg(short, long)]
    pub pipeline: String,

    /// Step order (zero-based)
    #[arg(short, long)]
    pub order: u32,

    /// YAML or JSON file with `step_type`, `config` and optional `name`
    /// used instead of the stored step
    #[arg(long = "override")]
    pub step_override: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show recent runs
#[derive(Debug, Args, Clone)]
pub struct RunsCommand {
    /// Pipeline name
    #[arg(short, long)]
    pub pipeline: String,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print a run log
#[derive(Debug, Args, Clone)]
pub struct LogsCommand {
    /// Run ID
    pub run_id: String,
}

/// Run the scheduler in the foreground
#[derive(Debug, Args, Clone)]
pub struct ScheduleCommand {
    /// Seconds between two schedule checks
    #[arg(long)]
    pub poll_secs: Option<u64>,

    /// Maximum number of runs executing at once
    #[arg(long)]
    pub max_runs: Option<usize>,
}

/// Delete a pipeline
#[derive(Debug, Args, Clone)]
pub struct DeleteCommand {
    /// Pipeline name
    #[arg(short, long)]
    pub pipeline: String,
}

/// Drop cached step snapshots
#[derive(Debug, Args, Clone)]
pub struct ClearCacheCommand {
    /// Pipeline name
    #[arg(short, long)]
    pub pipeline: String,
}
