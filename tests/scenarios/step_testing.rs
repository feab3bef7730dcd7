//! Test: Step Testing - running single steps against cached snapshots

use crate::helpers::*;
use mlpipe::core::keys;
use mlpipe::persistence::{FileStepCache, InMemoryStepCache, InMemoryStore, PipelineStore, StepCache};
use mlpipe::{PipelineError, StepExecutor, StepOverride, StepPreview, StepRegistry, StepType};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

async fn churn_executor(cache: Arc<dyn StepCache>) -> (StepExecutor, Uuid) {
    let (services, _warehouse) = warehouse_services().await;
    let store = Arc::new(InMemoryStore::new());
    let pipeline = store.create_pipeline(churn_pipeline()).await.unwrap();
    let executor = StepExecutor::new(
        pipeline.id,
        store,
        Arc::new(StepRegistry::with_builtins(services)),
        cache,
    );
    (executor, pipeline.id)
}

/// Training before preprocessing was ever tested
#[tokio::test]
async fn test_previous_step_not_run_scenario() {
    let cache = Arc::new(InMemoryStepCache::new());
    let (executor, pipeline_id) = churn_executor(cache.clone()).await;

    executor.run_step(0, None).await.unwrap();
    let err = executor.run_step(2, None).await.unwrap_err();

    assert!(matches!(err, PipelineError::PreviousStepNotRun { order: 1 }));
    assert!(err.to_string().contains("run the previous steps first"));
    // Nothing was written for the step that could not run
    assert!(cache.load(pipeline_id, 2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_replaying_a_step_is_stable() {
    let cache = Arc::new(InMemoryStepCache::new());
    let (executor, pipeline_id) = churn_executor(cache.clone()).await;

    executor.run_step(0, None).await.unwrap();
    let first_preview = executor.run_step(1, None).await.unwrap();
    let first = serde_json::to_value(cache.load(pipeline_id, 1).await.unwrap().unwrap()).unwrap();

    let second_preview = executor.run_step(1, None).await.unwrap();
    let second = serde_json::to_value(cache.load(pipeline_id, 1).await.unwrap().unwrap()).unwrap();

    assert_eq!(first_preview, second_preview);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_override_replaces_stored_step() {
    let cache = Arc::new(InMemoryStepCache::new());
    let (executor, pipeline_id) = churn_executor(cache.clone()).await;
    executor.run_step(0, None).await.unwrap();

    // Inference-mode preprocessing instead of the stored training split
    let step_override: StepOverride = serde_yaml::from_str(
        r#"
step_type: preprocessing
config:
  plugin: standard_scaler
"#,
    )
    .unwrap();
    assert_eq!(step_override.step_type, StepType::Preprocessing);

    let preview = executor.run_step(1, Some(step_override)).await.unwrap();
    assert!(matches!(preview, StepPreview::Table { rows: 20, .. }));

    let snapshot = cache.load(pipeline_id, 1).await.unwrap().unwrap();
    assert!(snapshot.contains(keys::PREPROCESSOR));
    assert!(!snapshot.contains(keys::X_TRAIN));
}

#[tokio::test]
async fn test_failed_step_keeps_old_snapshot() {
    let cache = Arc::new(InMemoryStepCache::new());
    let (executor, pipeline_id) = churn_executor(cache.clone()).await;
    executor.run_step(0, None).await.unwrap();
    executor.run_step(1, None).await.unwrap();

    let broken = StepOverride::new(StepType::Preprocessing, json!({"target_col": "no_such_column"}));
    let err = executor.run_step(1, Some(broken)).await.unwrap_err();
    assert!(err.is_step_failure());

    let snapshot = cache.load(pipeline_id, 1).await.unwrap().unwrap();
    assert!(snapshot.contains(keys::X_TRAIN));
}

#[tokio::test]
async fn test_file_cache_survives_new_executor() {
    let dir = std::env::temp_dir().join(format!("mlpipe_scenario_{}", Uuid::new_v4()));
    let (services, _warehouse) = warehouse_services().await;
    let registry = Arc::new(StepRegistry::with_builtins(services));
    let store = Arc::new(InMemoryStore::new());
    let pipeline = store.create_pipeline(churn_pipeline()).await.unwrap();

    let first = StepExecutor::new(
        pipeline.id,
        store.clone(),
        registry.clone(),
        Arc::new(FileStepCache::new(&dir)),
    );
    first.run_step(0, None).await.unwrap();
    first.run_step(1, None).await.unwrap();

    // Another process picks up where the first one stopped
    let second = StepExecutor::new(pipeline.id, store, registry, Arc::new(FileStepCache::new(&dir)));
    let preview = second.run_step(2, None).await.unwrap();
    assert!(matches!(preview, StepPreview::Summary { .. }));

    assert_eq!(second.clear_cache().await.unwrap(), 3);
    assert!(matches!(
        second.run_step(2, None).await.unwrap_err(),
        PipelineError::PreviousStepNotRun { order: 1 }
    ));

    std::fs::remove_dir_all(&dir).ok();
}
