//! SQLite-based persistence store

use crate::core::{Pipeline, PipelineDefinition, PipelineRun, PipelineStep, RunStatus, Schedule, StepType};
use crate::persistence::PipelineStore;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

/// SQLite pipeline store
pub struct SqliteStore {
    pool: SqlitePool,
}

const PIPELINE_COLUMNS: &str =
    "id, name, description, schedule_mode, schedule_time, schedule_interval, last_run, created_at";

const RUN_COLUMNS: &str = "id, pipeline_id, status, logs, created_at, completed_at";

impl SqliteStore {
    /// Create a new SQLite store; `:memory:` gives a private in-memory database
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if db_path == ":memory:" {
            Self::memory_pool_options()
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Every connection to :memory: is its own database, so the pool keeps
    /// exactly one connection open for the life of the store
    fn memory_pool_options() -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = default_db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?
            .to_string();
        Self::new(&db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                schedule_mode TEXT NOT NULL DEFAULT 'disabled',
                schedule_time TEXT,
                schedule_interval INTEGER,
                last_run TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pipeline_steps (
                pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                step_type TEXT NOT NULL,
                "order" INTEGER NOT NULL,
                config_json TEXT NOT NULL DEFAULT '{}',
                UNIQUE (pipeline_id, "order")
            );

            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                logs TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON pipeline_runs(pipeline_id);
            CREATE INDEX IF NOT EXISTS idx_runs_created_at ON pipeline_runs(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    async fn load_steps(&self, pipeline_id: Uuid) -> Result<Vec<PipelineStep>> {
        let rows = sqlx::query(
            r#"
            SELECT name, step_type, "order", config_json
            FROM pipeline_steps
            WHERE pipeline_id = ?1
            ORDER BY "order"
            "#,
        )
        .bind(pipeline_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pipeline steps")?;

        rows.iter()
            .map(|row| {
                Ok(PipelineStep {
                    name: row.get("name"),
                    step_type: StepType::parse(&row.get::<String, _>("step_type")),
                    order: row.get::<i64, _>("order") as u32,
                    config: serde_json::from_str(&row.get::<String, _>("config_json"))?,
                })
            })
            .collect()
    }

    /// Build a pipeline from a row and load its steps
    async fn hydrate(&self, row: &SqliteRow) -> Result<Pipeline> {
        let id = Uuid::parse_str(&row.get::<String, _>("id"))?;
        let schedule = Schedule::from_parts(
            &row.get::<String, _>("schedule_mode"),
            row.get::<Option<String>, _>("schedule_time").as_deref(),
            row.get::<Option<i64>, _>("schedule_interval"),
        )?;

        Ok(Pipeline {
            id,
            name: row.get("name"),
            description: row.get("description"),
            schedule,
            last_run: row.get::<Option<NaiveDateTime>, _>("last_run").map(Self::from_naive),
            created_at: Self::from_naive(row.get("created_at")),
            steps: self.load_steps(id).await?,
        })
    }

    /// Hydrate a listing; an unreadable row is logged and left out
    async fn hydrate_all(&self, rows: Vec<SqliteRow>) -> Vec<Pipeline> {
        let mut pipelines = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.hydrate(row).await {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e) => warn!(
                    "Skipping unreadable pipeline '{}': {:#}",
                    row.get::<String, _>("name"),
                    e
                ),
            }
        }
        pipelines
    }

    fn run_from_row(row: &SqliteRow) -> Result<PipelineRun> {
        Ok(PipelineRun {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_id: Uuid::parse_str(&row.get::<String, _>("pipeline_id"))?,
            status: row.get::<String, _>("status").parse::<RunStatus>()?,
            logs: row.get("logs"),
            created_at: Self::from_naive(row.get("created_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
        })
    }

    async fn write_pipeline(tx: &mut Transaction<'_, Sqlite>, pipeline: &Pipeline) -> Result<()> {
        let (mode, time, interval) = pipeline.schedule.to_parts()?;
        sqlx::query(
            r#"
            INSERT INTO pipelines
            (id, name, description, schedule_mode, schedule_time, schedule_interval, last_run, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                schedule_mode = excluded.schedule_mode,
                schedule_time = excluded.schedule_time,
                schedule_interval = excluded.schedule_interval
            "#,
        )
        .bind(pipeline.id.to_string())
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(mode)
        .bind(time)
        .bind(interval)
        .bind(pipeline.last_run.map(Self::to_naive))
        .bind(Self::to_naive(pipeline.created_at))
        .execute(&mut **tx)
        .await
        .with_context(|| format!("Failed to save pipeline '{}'", pipeline.name))?;

        sqlx::query("DELETE FROM pipeline_steps WHERE pipeline_id = ?1")
            .bind(pipeline.id.to_string())
            .execute(&mut **tx)
            .await?;

        for step in &pipeline.steps {
            sqlx::query(
                r#"
                INSERT INTO pipeline_steps (pipeline_id, name, step_type, "order", config_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(pipeline.id.to_string())
            .bind(&step.name)
            .bind(step.step_type.as_str())
            .bind(step.order as i64)
            .bind(serde_json::to_string(&step.config)?)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("Failed to save step '{}'", step.name))?;
        }

        Ok(())
    }

    async fn insert_run(tx: &mut Transaction<'_, Sqlite>, run: &PipelineRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, pipeline_id, status, logs, created_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.pipeline_id.to_string())
        .bind(run.status.as_str())
        .bind(&run.logs)
        .bind(Self::to_naive(run.created_at))
        .bind(run.completed_at.map(Self::to_naive))
        .execute(&mut **tx)
        .await
        .context("Failed to create run")?;
        Ok(())
    }
}

/// `<local data dir>/mlpipe/mlpipe.db`
pub fn default_db_path() -> std::path::PathBuf {
    crate::settings::data_dir().join("mlpipe.db")
}

#[async_trait::async_trait]
impl PipelineStore for SqliteStore {
    async fn create_pipeline(&self, definition: PipelineDefinition) -> Result<Pipeline> {
        definition.validate()?;
        if self.find_pipeline(&definition.name).await?.is_some() {
            anyhow::bail!("Pipeline '{}' already exists", definition.name);
        }

        let pipeline = Pipeline::from_definition(definition);
        let mut tx = self.pool.begin().await?;
        Self::write_pipeline(&mut tx, &pipeline).await?;
        tx.commit().await?;
        Ok(pipeline)
    }

    async fn update_pipeline(&self, id: Uuid, definition: PipelineDefinition) -> Result<Pipeline> {
        definition.validate()?;
        let mut pipeline = self
            .get_pipeline(id)
            .await?
            .with_context(|| format!("Pipeline {} not found", id))?;
        pipeline.apply(definition);

        let mut tx = self.pool.begin().await?;
        Self::write_pipeline(&mut tx, &pipeline).await?;
        tx.commit().await?;
        Ok(pipeline)
    }

    async fn get_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>> {
        let row = sqlx::query(&format!("SELECT {} FROM pipelines WHERE id = ?1", PIPELINE_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load pipeline")?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_pipeline(&self, name: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query(&format!("SELECT {} FROM pipelines WHERE name = ?1", PIPELINE_COLUMNS))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load pipeline")?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query(&format!("SELECT {} FROM pipelines ORDER BY name", PIPELINE_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;
        Ok(self.hydrate_all(rows).await)
    }

    async fn list_scheduled_pipelines(&self) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pipelines WHERE schedule_mode != 'disabled' ORDER BY name",
            PIPELINE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list scheduled pipelines")?;
        Ok(self.hydrate_all(rows).await)
    }

    async fn delete_pipeline(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete pipeline")?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_run(&self, pipeline_id: Uuid) -> Result<PipelineRun> {
        let run = PipelineRun::new(pipeline_id);
        let mut tx = self.pool.begin().await?;
        Self::insert_run(&mut tx, &run).await?;
        tx.commit().await?;
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        let row = sqlx::query(&format!("SELECT {} FROM pipeline_runs WHERE id = ?1", RUN_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::run_from_row).transpose()
    }

    async fn update_run(&self, run: &PipelineRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = ?2, completed_at = ?3, logs = ?4
            WHERE id = ?1
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.status.as_str())
        .bind(run.completed_at.map(Self::to_naive))
        .bind(&run.logs)
        .execute(&self.pool)
        .await
        .context("Failed to update run")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Run {} not found", run.id);
        }
        Ok(())
    }

    async fn append_run_log(&self, run_id: Uuid, line: &str) -> Result<()> {
        let result = sqlx::query("UPDATE pipeline_runs SET logs = logs || ?2 WHERE id = ?1")
            .bind(run_id.to_string())
            .bind(line)
            .execute(&self.pool)
            .await
            .context("Failed to append run log")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Run {} not found", run_id);
        }
        Ok(())
    }

    async fn list_runs(&self, pipeline_id: Uuid, limit: Option<usize>) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pipeline_runs WHERE pipeline_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            RUN_COLUMNS
        ))
        .bind(pipeline_id.to_string())
        .bind(limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::run_from_row).collect()
    }

    async fn trigger_scheduled_run(
        &self,
        pipeline_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PipelineRun>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT schedule_mode, schedule_time, schedule_interval, last_run FROM pipelines WHERE id = ?1",
        )
        .bind(pipeline_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load pipeline schedule")?
        .with_context(|| format!("Pipeline {} not found", pipeline_id))?;

        let schedule = Schedule::from_parts(
            &row.get::<String, _>("schedule_mode"),
            row.get::<Option<String>, _>("schedule_time").as_deref(),
            row.get::<Option<i64>, _>("schedule_interval"),
        )?;
        let last_run: Option<NaiveDateTime> = row.get("last_run");
        if !schedule.is_due(last_run.map(Self::from_naive), now) {
            return Ok(None);
        }

        // Only advance from the value we just read
        let updated = sqlx::query("UPDATE pipelines SET last_run = ?2 WHERE id = ?1 AND last_run IS ?3")
            .bind(pipeline_id.to_string())
            .bind(Self::to_naive(now))
            .bind(last_run)
            .execute(&mut *tx)
            .await
            .context("Failed to update last_run")?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let run = PipelineRun::new(pipeline_id);
        Self::insert_run(&mut tx, &run).await?;
        tx.commit().await?;

        Ok(Some(run))
    }
}
