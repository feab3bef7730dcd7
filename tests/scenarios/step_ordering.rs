//! Test: Step Ordering - steps run by ascending order, status only moves forward

use crate::helpers::*;
use mlpipe::core::ContextValue;
use mlpipe::execution::ExecutionEvent;
use mlpipe::persistence::PipelineStore;
use mlpipe::{ExecutionContext, PipelineDefinition, RunStatus, StepError, StepHandler};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_steps_run_in_ascending_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (store, engine) = setup_engine(recording_registry(&["a", "b", "c", "d"], calls.clone()));
    // Declared out of order, with a gap
    let pipeline = store
        .create_pipeline(custom_pipeline(
            "shuffled",
            &[("Third", "c", 7), ("First", "a", 0), ("Fourth", "d", 9), ("Second", "b", 3)],
        ))
        .await
        .unwrap();

    let (result, run) = run_once(store.as_ref(), &engine, pipeline.id).await;

    result.unwrap();
    assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c", "d"]);
    assert_log_order(
        &run,
        &[
            "Executing step: First (a)",
            "Executing step: Second (b)",
            "Executing step: Third (c)",
            "Executing step: Fourth (d)",
        ],
    );
}

#[tokio::test]
async fn test_duplicate_orders_rejected() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (store, _engine) = setup_engine(recording_registry(&["a"], calls));
    let result = store
        .create_pipeline(custom_pipeline("dup", &[("One", "a", 1), ("Other", "a", 1)]))
        .await;
    assert!(result.is_err());
}

/// Reads what the previous step left behind and adds one to it
struct Counter;

#[async_trait::async_trait]
impl StepHandler for Counter {
    async fn execute(&self, context: &mut ExecutionContext, _config: &Value) -> Result<(), StepError> {
        let current = match context.get("count") {
            Some(ContextValue::Json(value)) => value.as_i64().unwrap_or(0),
            _ => 0,
        };
        context.insert("count", ContextValue::Json(json!(current + 1)));
        context.note(format!("count = {}", current + 1));
        Ok(())
    }
}

#[tokio::test]
async fn test_one_context_is_shared_across_steps() {
    let mut registry = mlpipe::StepRegistry::new();
    registry.register(custom("count"), Arc::new(Counter));
    let (store, engine) = setup_engine(registry);
    let pipeline = store
        .create_pipeline(custom_pipeline(
            "counting",
            &[("One", "count", 0), ("Two", "count", 1), ("Three", "count", 2)],
        ))
        .await
        .unwrap();

    let (_, run) = run_once(store.as_ref(), &engine, pipeline.id).await;
    assert_log_order(&run, &["count = 1", "count = 2", "count = 3"]);

    // A new run starts from an empty context
    let (_, second) = run_once(store.as_ref(), &engine, pipeline.id).await;
    assert_log_order(&second, &["count = 1", "count = 2", "count = 3"]);
}

#[tokio::test]
async fn test_status_only_moves_forward() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (store, engine) = setup_engine(recording_registry(&["a", "b"], calls));
    let events = capture_events(&engine).await;
    let pipeline = store
        .create_pipeline(custom_pipeline("pair", &[("A", "a", 0), ("B", "b", 1)]))
        .await
        .unwrap();

    let run = store.create_run(pipeline.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    engine.run(run.id).await.unwrap();

    let run = store.get_run(run.id).await.unwrap().unwrap();
    assert_run_status(&run, RunStatus::Completed);
    assert!(run.completed_at.unwrap() >= run.created_at);

    // A finished run cannot be started again
    assert!(engine.run(run.id).await.is_err());
    assert_run_status(&store.get_run(run.id).await.unwrap().unwrap(), RunStatus::Completed);

    let finished: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::RunFinished { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![RunStatus::Completed]);
}

#[tokio::test]
async fn test_empty_pipeline_completes() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (store, engine) = setup_engine(recording_registry(&[], calls));
    let pipeline = store
        .create_pipeline(PipelineDefinition::new("empty", vec![]))
        .await
        .unwrap();

    let (result, run) = run_once(store.as_ref(), &engine, pipeline.id).await;
    result.unwrap();
    assert_run_status(&run, RunStatus::Completed);
}
