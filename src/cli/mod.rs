//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    ApplyCommand, ClearCacheCommand, DeleteCommand, ListCommand, LogsCommand, RunCommand,
    RunsCommand, ScheduleCommand, TestStepCommand, ValidateCommand,
};
use std::ffi::OsString;
use std::path::PathBuf;

/// Scheduled ML pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "mlpipe")]
#[command(author = "mlpipe contributors")]
#[command(version = "0.1.0")]
#[command(about = "Run and schedule ML pipelines: extraction, preprocessing, training, prediction, save", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// SQLite database file (defaults to $MLPIPE_DB or the local data dir)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Step snapshot directory (defaults to $MLPIPE_CACHE_DIR or the local data dir)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Create or update a pipeline from a YAML file
    Apply(ApplyCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// List stored pipelines
    List(ListCommand),

    /// Run a pipeline now and wait for it
    Run(RunCommand),

    /// Run a single step against the cached output of the previous one
    TestStep(TestStepCommand),

    /// Show recent runs of a pipeline
    Runs(RunsCommand),

    /// Print the log of a run
    Logs(LogsCommand),

    /// Trigger scheduled pipelines until interrupted
    Schedule(ScheduleCommand),

    /// Delete a pipeline with its runs
    Delete(DeleteCommand),

    /// Drop cached step snapshots of a pipeline
    ClearCache(ClearCacheCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
