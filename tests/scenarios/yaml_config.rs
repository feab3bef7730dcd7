//! Test: YAML Config - definitions loaded from YAML, applied, and run

use crate::helpers::*;
use mlpipe::core::config::PipelineConfig;
use mlpipe::persistence::PipelineStore;
use mlpipe::{RunStatus, Schedule, StepRegistry, StepType};

const CHURN_YAML: &str = r#"
name: churn-nightly
description: Nightly churn scoring

schedule:
  mode: daily
  time: "02:30"

steps:
  - name: Load customers
    type: extraction
    config:
      database: { type: memory, name: warehouse }
      query: SELECT * FROM customers

  - name: Scale features
    type: preprocessing
    config:
      target_col: churned

  - name: Train baseline
    type: training
    config:
      model:
        task_type: classification

  - name: Predict
    type: prediction

  - name: Store predictions
    type: save
    config:
      database: { type: memory, name: warehouse }
      table_name: churn_scores
"#;

#[tokio::test]
async fn test_yaml_pipeline_runs() {
    let config = PipelineConfig::from_yaml(CHURN_YAML).unwrap();
    let definition = config.to_definition().unwrap();

    assert_eq!(definition.steps.len(), 5);
    assert_eq!(definition.steps[3].step_type, StepType::Prediction);
    assert_eq!(definition.steps[3].order, 3);
    assert!(matches!(definition.schedule, Schedule::Daily { .. }));

    let (services, warehouse) = warehouse_services().await;
    let (store, engine) = setup_engine(StepRegistry::with_builtins(services));
    let pipeline = store.create_pipeline(definition).await.unwrap();

    let (result, run) = run_once(store.as_ref(), &engine, pipeline.id).await;
    assert!(result.is_ok(), "run failed:\n{}", run.logs);
    assert_run_status(&run, RunStatus::Completed);

    // 20 rows with the default 0.2 test fraction leaves 4 to score
    assert_eq!(warehouse.table("churn_scores").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_reapplying_keeps_identity_and_history() {
    let (services, _warehouse) = warehouse_services().await;
    let (store, engine) = setup_engine(StepRegistry::with_builtins(services));

    let definition = PipelineConfig::from_yaml(CHURN_YAML).unwrap().to_definition().unwrap();
    let created = store.create_pipeline(definition).await.unwrap();
    run_once(store.as_ref(), &engine, created.id).await.0.unwrap();

    let changed = CHURN_YAML.replace("\"02:30\"", "\"04:00\"");
    let definition = PipelineConfig::from_yaml(&changed).unwrap().to_definition().unwrap();
    let updated = store.update_pipeline(created.id, definition).await.unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.schedule, Schedule::Daily { time: "04:00".parse().unwrap() });
    assert_eq!(store.list_runs(created.id, None).await.unwrap().len(), 1);
}

#[test]
fn test_invalid_yaml_rejected() {
    let bad_time = CHURN_YAML.replace("\"02:30\"", "\"25:61\"");
    assert!(PipelineConfig::from_yaml(&bad_time).is_err());

    let duplicate_orders = r#"
name: dup
steps:
  - name: A
    type: extraction
    order: 0
  - name: B
    type: save
    order: 0
"#;
    let err = PipelineConfig::from_yaml(duplicate_orders).unwrap_err();
    assert!(err.to_string().contains("Duplicate step order 0"));
}
