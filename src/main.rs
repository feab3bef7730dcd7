use anyhow::{Context, Result};
use mlpipe::cli::commands::{
    ApplyCommand, ClearCacheCommand, DeleteCommand, ListCommand, LogsCommand, RunCommand,
    RunsCommand, ScheduleCommand, TestStepCommand, ValidateCommand,
};
use mlpipe::cli::output::*;
use mlpipe::cli::{Cli, Command};
use mlpipe::core::config::PipelineConfig;
use mlpipe::persistence::FileStepCache;
use mlpipe::{
    ExecutionEvent, Pipeline, PipelineEngine, PipelineError, PipelineScheduler, PipelineStore,
    RunStatus, ScheduleEvaluator, Settings, StepExecutor, StepOverride, StepRegistry,
    StepServices, TokioDispatcher,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mlpipe={}", default_level)));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let mut settings = Settings::from_env()?;
    if let Some(db) = &cli.db {
        settings = settings.with_db_path(db);
    }
    if let Some(dir) = &cli.cache_dir {
        settings = settings.with_cache_dir(dir);
    }

    // Execute command
    match &cli.command {
        Command::Apply(cmd) => apply_pipeline(cmd, &settings).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd, &settings).await?,
        Command::Run(cmd) => run_pipeline(cmd, &settings, cli.verbose).await?,
        Command::TestStep(cmd) => test_step(cmd, &settings).await?,
        Command::Runs(cmd) => show_runs(cmd, &settings).await?,
        Command::Logs(cmd) => show_logs(cmd, &settings).await?,
        Command::Schedule(cmd) => run_scheduler(cmd, settings.clone()).await?,
        Command::Delete(cmd) => delete_pipeline(cmd, &settings).await?,
        Command::ClearCache(cmd) => clear_cache(cmd, &settings).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_store(settings: &Settings) -> Result<Arc<dyn PipelineStore>> {
    let path = settings
        .db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    if path != ":memory:" {
        if let Some(parent) = settings.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(Arc::new(mlpipe::persistence::SqliteStore::new(path).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_settings: &Settings) -> Result<Arc<dyn PipelineStore>> {
    tracing::warn!("Built without the sqlite feature; pipelines are not persisted");
    Ok(Arc::new(mlpipe::InMemoryStore::new()))
}

fn step_registry() -> Arc<StepRegistry> {
    Arc::new(StepRegistry::with_builtins(StepServices::default()))
}

async fn pipeline_by_name(store: &dyn PipelineStore, name: &str) -> Result<Pipeline> {
    store
        .find_pipeline(name)
        .await?
        .ok_or_else(|| PipelineError::PipelineNameNotFound(name.to_string()).into())
}

async fn apply_pipeline(cmd: &ApplyCommand, settings: &Settings) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let definition = config.to_definition()?;
    let store = open_store(settings).await?;

    let (pipeline, verb) = match store.find_pipeline(&definition.name).await? {
        Some(existing) => (store.update_pipeline(existing.id, definition).await?, "Updated"),
        None => (store.create_pipeline(definition).await?, "Created"),
    };

    println!(
        "{} {} pipeline {} ({} steps, {})",
        CHECK,
        verb,
        style(&pipeline.name).bold(),
        style(pipeline.steps.len()).cyan(),
        style(pipeline.schedule.to_string()).dim()
    );
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let definition = config.to_definition()?;
        definition.validate()?;
        Ok((config, definition))
    });

    match result {
        Ok((config, definition)) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Schedule: {}", style(definition.schedule.to_string()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand, settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let data = serde_json::json!({ "pipelines": pipelines });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found", INFO);
        return Ok(());
    }

    println!("{} Pipelines:", INFO);
    for pipeline in &pipelines {
        println!("  {}", format_pipeline(pipeline));
    }
    Ok(())
}

async fn run_pipeline(cmd: &RunCommand, settings: &Settings, verbose: bool) -> Result<()> {
    let store = open_store(settings).await?;
    let pipeline = pipeline_by_name(store.as_ref(), &cmd.pipeline).await?;
    let engine = PipelineEngine::new(store.clone(), step_registry());

    let progress = create_progress_bar(pipeline.steps.len());
    let bar = progress.clone();
    engine
        .add_event_handler(move |event| {
            if let ExecutionEvent::StepCompleted { .. } = &event {
                bar.inc(1);
            }
            if let ExecutionEvent::Log { line, .. } = &event {
                if verbose {
                    bar.println(line.trim_end());
                }
            }
            if let Some(text) = format_execution_event(&event) {
                bar.println(text);
            }
        })
        .await;

    let run = store.create_run(pipeline.id).await?;
    let result = engine.run(run.id).await;
    progress.finish_and_clear();

    match result {
        Ok(run_id) => {
            println!(
                "\n{} {} completed {} (run {})",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green(),
                style(run_id).dim()
            );
            Ok(())
        }
        Err(e) => {
            println!("\n{} {} {}", CROSS, style(&pipeline.name).bold(), style("failed").red());
            if let Some(failed) = store.get_run(run.id).await? {
                println!("{}", separator());
                println!("{}", format_output(failed.logs.trim_end(), 20));
            }
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn test_step(cmd: &TestStepCommand, settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let pipeline = pipeline_by_name(store.as_ref(), &cmd.pipeline).await?;

    let step_override = match &cmd.step_override {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read override file: {}", path.display()))?;
            let parsed: StepOverride =
                serde_yaml::from_str(&content).context("Failed to parse step override")?;
            Some(parsed)
        }
        None => None,
    };

    let cache = Arc::new(FileStepCache::new(&settings.cache_dir));
    let executor = StepExecutor::new(pipeline.id, store, step_registry(), cache);

    match executor.run_step(cmd.order, step_override).await {
        Ok(preview) => {
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                print!("{}", format_preview(&preview));
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Step {} failed:", CROSS, cmd.order);
            println!("  {}", style(&e).red());
            if let PipelineError::PreviousStepNotRun { order } = e {
                println!(
                    "  {} mlpipe test-step -p {} -o {}",
                    style("Try first:").dim(),
                    cmd.pipeline,
                    order
                );
            }
            std::process::exit(1);
        }
    }
}

async fn show_runs(cmd: &RunsCommand, settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let pipeline = pipeline_by_name(store.as_ref(), &cmd.pipeline).await?;
    let runs = store.list_runs(pipeline.id, Some(cmd.limit)).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found for {}", INFO, style(&pipeline.name).bold());
        return Ok(());
    }

    println!(
        "{} Runs of {} (showing latest {}):",
        INFO,
        style(&pipeline.name).bold(),
        cmd.limit
    );
    for run in &runs {
        println!("  {}", format_run_summary(run));
    }
    Ok(())
}

async fn show_logs(cmd: &LogsCommand, settings: &Settings) -> Result<()> {
    let run_id = uuid::Uuid::parse_str(&cmd.run_id).context("Invalid run ID format")?;
    let store = open_store(settings).await?;

    match store.get_run(run_id).await? {
        Some(run) => {
            println!("{} Run {} - {}", INFO, style(run.id).cyan(), format_status(run.status));
            println!("{}", separator());
            print!("{}", run.logs);
        }
        None => println!("{} Run not found", WARN),
    }
    Ok(())
}

async fn run_scheduler(cmd: &ScheduleCommand, mut settings: Settings) -> Result<()> {
    if let Some(secs) = cmd.poll_secs {
        settings = settings.with_poll_interval(Duration::from_secs(secs.max(1)));
    }
    if let Some(max) = cmd.max_runs {
        settings = settings.with_max_concurrent_runs(max);
    }

    let store = open_store(&settings).await?;
    let engine = Arc::new(PipelineEngine::new(store.clone(), step_registry()));
    engine
        .add_event_handler(|event| {
            if let ExecutionEvent::RunFinished { run_id, status } = event {
                match status {
                    RunStatus::Completed => info!("Run {} completed", run_id),
                    _ => error!("Run {} finished as {}", run_id, status),
                }
            }
        })
        .await;

    let mut dispatcher = TokioDispatcher::new(engine, settings.max_concurrent_runs);
    if let Some(timeout) = settings.run_timeout {
        dispatcher = dispatcher.with_run_timeout(timeout);
    }
    let dispatcher = Arc::new(dispatcher);

    let scheduler = PipelineScheduler::new(ScheduleEvaluator::new(store, dispatcher.clone()))
        .with_poll_interval(settings.poll_interval);

    scheduler.start().await;
    println!(
        "{} Scheduler running (poll every {}s); press Ctrl-C to stop",
        CLOCK,
        settings.poll_interval.as_secs()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("\n{} Stopping scheduler, waiting for active runs...", INFO);
    scheduler.stop().await;
    dispatcher.drain().await;
    println!("{} Scheduler stopped", CHECK);
    Ok(())
}

async fn delete_pipeline(cmd: &DeleteCommand, settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let pipeline = pipeline_by_name(store.as_ref(), &cmd.pipeline).await?;

    store.delete_pipeline(pipeline.id).await?;
    let cache = FileStepCache::new(&settings.cache_dir);
    let removed = mlpipe::StepCache::clear(&cache, pipeline.id).await?;

    println!(
        "{} Deleted {} ({} cached snapshot(s) removed)",
        CHECK,
        style(&pipeline.name).bold(),
        removed
    );
    Ok(())
}

async fn clear_cache(cmd: &ClearCacheCommand, settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let pipeline = pipeline_by_name(store.as_ref(), &cmd.pipeline).await?;

    let cache = Arc::new(FileStepCache::new(&settings.cache_dir));
    let executor = StepExecutor::new(pipeline.id, store, step_registry(), cache);
    let removed = executor.clear_cache().await?;

    println!(
        "{} Removed {} cached snapshot(s) of {}",
        CHECK,
        removed,
        style(&pipeline.name).bold()
    );
    Ok(())
}
