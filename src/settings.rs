//! Process settings: where state lives and how runs are scheduled
//!
//! Values come from the environment (`MLPIPE_*` variables) on top of
//! defaults under the local data directory; the CLI then overrides
//! individual fields.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_DB: &str = "MLPIPE_DB";
pub const ENV_CACHE_DIR: &str = "MLPIPE_CACHE_DIR";
pub const ENV_POLL_SECS: &str = "MLPIPE_POLL_SECS";
pub const ENV_RUN_TIMEOUT_SECS: &str = "MLPIPE_RUN_TIMEOUT_SECS";
pub const ENV_MAX_RUNS: &str = "MLPIPE_MAX_RUNS";

/// Base directory for the database and step snapshots
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mlpipe")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// SQLite database file (`:memory:` for a throwaway store)
    pub db_path: PathBuf,
    /// Directory holding cached step snapshots
    pub cache_dir: PathBuf,
    pub poll_interval: Duration,
    /// Runs taking longer are failed by the dispatcher
    pub run_timeout: Option<Duration>,
    pub max_concurrent_runs: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let base = data_dir();
        Self {
            db_path: base.join("mlpipe.db"),
            cache_dir: base.join("step_cache"),
            poll_interval: Duration::from_secs(5),
            run_timeout: None,
            max_concurrent_runs: 4,
        }
    }
}

impl Settings {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(db) = lookup(ENV_DB) {
            settings.db_path = PathBuf::from(db);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            settings.cache_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_POLL_SECS)? {
            settings.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_RUN_TIMEOUT_SECS)? {
            settings.run_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(max) = parse_var::<usize>(&lookup, ENV_MAX_RUNS)? {
            anyhow::ensure!(max > 0, "{} must be at least 1", ENV_MAX_RUNS);
            settings.max_concurrent_runs = max;
        }

        Ok(settings)
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max.max(1);
        self
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: '{}'", key, raw))
        })
        .transpose()
}
