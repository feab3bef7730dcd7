//! Test: Failure Handling - a failing step ends the run, nothing after it runs

use crate::helpers::*;
use mlpipe::execution::ExecutionEvent;
use mlpipe::persistence::PipelineStore;
use mlpipe::{PipelineError, RunStatus, StepError, StepRegistry};
use std::sync::{Arc, Mutex};

/// Step 2 of 3 fails: step 1 ran, step 3 never did
#[tokio::test]
async fn test_failing_middle_step() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (store, engine) = setup_engine(recording_registry(&["load", "save"], calls.clone()));
    let pipeline = store
        .create_pipeline(custom_pipeline(
            "flaky",
            &[("Load", "load", 0), ("Explode", "fail", 1), ("Save", "save", 2)],
        ))
        .await
        .unwrap();

    let (result, run) = run_once(store.as_ref(), &engine, pipeline.id).await;

    match result {
        Err(PipelineError::Step { step, source }) => {
            assert_eq!(step, "Explode");
            assert!(matches!(source, StepError::Execution(_)));
        }
        other => panic!("expected step failure, got {:?}", other),
    }

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(*calls.lock().unwrap(), vec!["load"]);
    assert_log_order(
        &run,
        &[
            "Executing step: Load (load)",
            "Load done",
            "Executing step: Explode (fail)",
            "Pipeline failed: step 'Explode' failed: boom",
        ],
    );
    assert!(!run.logs.contains("Executing step: Save"));
    assert!(!run.logs.contains("completed successfully"));
}

#[tokio::test]
async fn test_unknown_step_type_fails_run() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (store, engine) = setup_engine(recording_registry(&["load"], calls.clone()));
    let pipeline = store
        .create_pipeline(custom_pipeline(
            "typo",
            &[("Load", "load", 0), ("Mystery", "transmogrify", 1)],
        ))
        .await
        .unwrap();

    let (result, run) = run_once(store.as_ref(), &engine, pipeline.id).await;

    assert!(matches!(result, Err(PipelineError::UnknownStepType(ref t)) if t == "transmogrify"));
    assert_run_status(&run, RunStatus::Failed);
    assert!(run.logs.contains("Pipeline failed: unknown step type 'transmogrify'"));
}

#[tokio::test]
async fn test_missing_input_names_the_key() {
    let (services, _warehouse) = warehouse_services().await;
    let (store, engine) = setup_engine(StepRegistry::with_builtins(services));
    let mut definition = churn_pipeline();
    // Training without preprocessing has no X_train
    definition.steps.retain(|step| step.order != 1);
    let pipeline = store.create_pipeline(definition).await.unwrap();

    let (result, run) = run_once(store.as_ref(), &engine, pipeline.id).await;

    match result {
        Err(PipelineError::Step {
            source: StepError::MissingInput { key },
            ..
        }) => assert_eq!(key, "X_train"),
        other => panic!("expected missing input, got {:?}", other),
    }
    assert_run_status(&run, RunStatus::Failed);
}

#[tokio::test]
async fn test_pipeline_deleted_before_run_starts() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (store, engine) = setup_engine(recording_registry(&["load"], calls.clone()));
    let pipeline = store
        .create_pipeline(custom_pipeline("gone", &[("Load", "load", 0)]))
        .await
        .unwrap();
    let run = store.create_run(pipeline.id).await.unwrap();
    store.delete_pipeline(pipeline.id).await.unwrap();

    // Deleting the pipeline removed the run as well
    let err = engine.run(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::RunNotFound(id) if id == run.id));
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_events() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (store, engine) = setup_engine(recording_registry(&["load"], calls));
    let events = capture_events(&engine).await;
    let pipeline = store
        .create_pipeline(custom_pipeline("flaky", &[("Load", "load", 0), ("Explode", "fail", 1)]))
        .await
        .unwrap();

    run_once(store.as_ref(), &engine, pipeline.id).await.0.unwrap_err();

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { order: 1, error, .. } if error.contains("boom")
    )));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished {
            status: RunStatus::Failed,
            ..
        })
    ));
}
