//! Test: End to end - the built-in steps from extraction to save

use crate::helpers::*;
use mlpipe::core::keys;
use mlpipe::persistence::{InMemoryStepCache, PipelineStore, StepCache};
use mlpipe::{RunStatus, StepExecutor, StepPreview, StepRegistry};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_churn_pipeline_saves_predictions() {
    let (services, warehouse) = warehouse_services().await;
    let (store, engine) = setup_engine(StepRegistry::with_builtins(services));
    let pipeline = store.create_pipeline(churn_pipeline()).await.unwrap();

    let (result, run) = run_once(store.as_ref(), &engine, pipeline.id).await;

    assert!(result.is_ok(), "run failed:\n{}", run.logs);
    assert_run_status(&run, RunStatus::Completed);
    assert_log_order(
        &run,
        &[
            "Starting pipeline execution...",
            "Executing step: Load customers (extraction)",
            "Extracted 20 rows.",
            "Executing step: Scale features (preprocessing)",
            "Executing step: Train baseline (training)",
            "Model Accuracy:",
            "Training completed. Run ID:",
            "Executing step: Predict (prediction)",
            "Using X_test from training for prediction.",
            "Prediction completed.",
            "Executing step: Store predictions (save)",
            "Saved 5 rows to predictions.",
            "Pipeline execution completed successfully.",
        ],
    );

    let saved = warehouse.table("predictions").await.unwrap();
    assert_eq!(saved.len(), 5);
    assert!(saved.columns().contains(&"prediction".to_string()));
    assert!(saved.columns().contains(&"run_id".to_string()));
    // Majority class of the training rows is "not churned"
    assert!(saved.column("prediction").unwrap().iter().all(|p| *p == json!(0)));
}

#[tokio::test]
async fn test_second_run_appends_predictions() {
    let (services, warehouse) = warehouse_services().await;
    let (store, engine) = setup_engine(StepRegistry::with_builtins(services));
    let pipeline = store.create_pipeline(churn_pipeline()).await.unwrap();

    run_once(store.as_ref(), &engine, pipeline.id).await.0.unwrap();
    run_once(store.as_ref(), &engine, pipeline.id).await.0.unwrap();

    assert_eq!(warehouse.table("predictions").await.unwrap().len(), 10);

    let runs = store.list_runs(pipeline.id, None).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.status == RunStatus::Completed));
}

#[tokio::test]
async fn test_step_by_step_matches_full_run() {
    let (services, _warehouse) = warehouse_services().await;
    let registry = Arc::new(StepRegistry::with_builtins(services));
    let store = Arc::new(mlpipe::InMemoryStore::new());
    let pipeline = store.create_pipeline(churn_pipeline()).await.unwrap();
    let cache = Arc::new(InMemoryStepCache::new());
    let executor = StepExecutor::new(pipeline.id, store.clone(), registry, cache.clone());

    let mut previews = Vec::new();
    for order in 0..4 {
        previews.push(executor.run_step(order, None).await.unwrap());
    }

    assert!(matches!(previews[0], StepPreview::Table { rows: 20, .. }));
    assert!(matches!(previews[2], StepPreview::Summary { .. }));
    match &previews[3] {
        StepPreview::Table { rows, columns, .. } => {
            assert_eq!(*rows, 5);
            assert!(columns.contains(&"model_type".to_string()));
        }
        other => panic!("expected table preview, got {:?}", other),
    }

    // Step testing never creates runs
    assert!(store.list_runs(pipeline.id, None).await.unwrap().is_empty());

    let snapshot = cache.load(pipeline.id, 3).await.unwrap().unwrap();
    assert!(snapshot.contains(keys::MODEL));
    assert!(snapshot.contains(keys::RUN_ID));
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_churn_pipeline_on_sqlite_store() {
    use mlpipe::persistence::SqliteStore;
    use mlpipe::PipelineEngine;

    let (services, warehouse) = warehouse_services().await;
    let store = Arc::new(SqliteStore::new(":memory:").await.unwrap());
    let engine = PipelineEngine::new(store.clone(), Arc::new(StepRegistry::with_builtins(services)));
    let pipeline = store.create_pipeline(churn_pipeline()).await.unwrap();

    let (result, run) = run_once(store.as_ref(), &engine, pipeline.id).await;

    assert!(result.is_ok(), "run failed:\n{}", run.logs);
    assert_run_status(&run, RunStatus::Completed);
    assert_eq!(warehouse.table("predictions").await.unwrap().len(), 5);
}
