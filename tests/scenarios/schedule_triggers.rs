//! Test: Schedule Triggers - when scheduled pipelines fire, and how often

use crate::helpers::*;
use chrono::Duration;
use mlpipe::execution::{ScheduleEvaluator, TokioDispatcher};
use mlpipe::persistence::{InMemoryStore, PipelineStore};
use mlpipe::{PipelineEngine, RunStatus, Schedule};
use std::sync::{Arc, Mutex};

fn evaluator() -> (Arc<InMemoryStore>, Arc<RecordingDispatcher>, ScheduleEvaluator) {
    let store = Arc::new(InMemoryStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let evaluator = ScheduleEvaluator::new(store.clone(), dispatcher.clone());
    (store, dispatcher, evaluator)
}

/// Hourly pipeline: fires at once, not 10s later, again after 3601s
#[tokio::test]
async fn test_interval_schedule_scenario() {
    let (store, dispatcher, evaluator) = evaluator();
    let pipeline = store
        .create_pipeline(
            custom_pipeline("hourly", &[("Load", "load", 0)])
                .with_schedule(Schedule::Interval { every_secs: 3600 }),
        )
        .await
        .unwrap();

    let t0 = at(2024, 5, 14, 9, 0, 0);

    let fired = evaluator.tick(t0).await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].pipeline_id, pipeline.id);
    let reloaded = store.get_pipeline(pipeline.id).await.unwrap().unwrap();
    assert_eq!(reloaded.last_run, Some(t0));

    assert!(evaluator.tick(t0 + Duration::seconds(10)).await.is_empty());

    let fired = evaluator.tick(t0 + Duration::seconds(3601)).await;
    assert_eq!(fired.len(), 1);

    let runs = store.list_runs(pipeline.id, None).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.status == RunStatus::Pending));
    assert_eq!(dispatcher.submitted().len(), 2);
}

#[tokio::test]
async fn test_interval_triggers_are_spaced() {
    let (store, dispatcher, evaluator) = evaluator();
    store
        .create_pipeline(
            custom_pipeline("every-minute", &[("Load", "load", 0)])
                .with_schedule(Schedule::Interval { every_secs: 60 }),
        )
        .await
        .unwrap();

    // Poll every 7 seconds for half an hour
    let start = at(2024, 5, 14, 9, 0, 0);
    let mut trigger_times = Vec::new();
    for tick in 0..(30 * 60 / 7) {
        let now = start + Duration::seconds(tick * 7);
        if !evaluator.tick(now).await.is_empty() {
            trigger_times.push(now);
        }
    }

    assert_eq!(trigger_times.len(), dispatcher.submitted().len());
    assert!(trigger_times.len() >= 25);
    for pair in trigger_times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::seconds(60));
    }
}

#[tokio::test]
async fn test_same_instant_never_triggers_twice() {
    let (store, dispatcher, evaluator) = evaluator();
    store
        .create_pipeline(
            custom_pipeline("hourly", &[("Load", "load", 0)])
                .with_schedule(Schedule::Interval { every_secs: 3600 }),
        )
        .await
        .unwrap();

    let now = at(2024, 5, 14, 9, 0, 0);
    let (first, second) = tokio::join!(evaluator.tick(now), evaluator.tick(now));
    assert_eq!(first.len() + second.len(), 1);
    assert_eq!(dispatcher.submitted().len(), 1);
}

#[tokio::test]
async fn test_daily_fires_once_per_day() {
    let (store, dispatcher, evaluator) = evaluator();
    let pipeline = store
        .create_pipeline(
            custom_pipeline("nightly", &[("Load", "load", 0)]).with_schedule(Schedule::Daily {
                time: "02:00".parse().unwrap(),
            }),
        )
        .await
        .unwrap();

    assert!(evaluator.tick(at(2024, 5, 14, 1, 59, 55)).await.is_empty());
    assert_eq!(evaluator.tick(at(2024, 5, 14, 2, 0, 0)).await.len(), 1);
    // Later polls within the same minute
    assert!(evaluator.tick(at(2024, 5, 14, 2, 0, 5)).await.is_empty());
    assert!(evaluator.tick(at(2024, 5, 14, 2, 0, 55)).await.is_empty());
    assert!(evaluator.tick(at(2024, 5, 14, 2, 1, 0)).await.is_empty());

    assert_eq!(evaluator.tick(at(2024, 5, 15, 2, 0, 30)).await.len(), 1);

    let reloaded = store.get_pipeline(pipeline.id).await.unwrap().unwrap();
    assert_eq!(reloaded.last_run, Some(at(2024, 5, 15, 2, 0, 30)));
    assert_eq!(dispatcher.submitted().len(), 2);
}

#[tokio::test]
async fn test_daily_missed_minute_waits_for_tomorrow() {
    let (store, dispatcher, evaluator) = evaluator();
    store
        .create_pipeline(
            custom_pipeline("nightly", &[("Load", "load", 0)]).with_schedule(Schedule::Daily {
                time: "02:00".parse().unwrap(),
            }),
        )
        .await
        .unwrap();

    // First poll after 02:00 lands at 02:01
    assert!(evaluator.tick(at(2024, 5, 14, 2, 1, 2)).await.is_empty());
    assert!(dispatcher.submitted().is_empty());
}

#[tokio::test]
async fn test_disabled_and_other_pipelines_untouched() {
    let (store, dispatcher, evaluator) = evaluator();
    let manual = store
        .create_pipeline(custom_pipeline("manual", &[("Load", "load", 0)]))
        .await
        .unwrap();
    let hourly = store
        .create_pipeline(
            custom_pipeline("hourly", &[("Load", "load", 0)])
                .with_schedule(Schedule::Interval { every_secs: 3600 }),
        )
        .await
        .unwrap();

    evaluator.tick(at(2024, 5, 14, 9, 0, 0)).await;

    let jobs = dispatcher.submitted();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].pipeline_id, hourly.id);
    let manual = store.get_pipeline(manual.id).await.unwrap().unwrap();
    assert_eq!(manual.last_run, None);
    assert!(store.list_runs(manual.id, None).await.unwrap().is_empty());
}

/// Scheduled runs go through the real dispatcher and complete
#[tokio::test]
async fn test_scheduled_run_executes() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(PipelineEngine::new(
        store.clone(),
        Arc::new(recording_registry(&["load"], calls.clone())),
    ));
    let dispatcher = Arc::new(TokioDispatcher::new(engine, 2));
    let evaluator = ScheduleEvaluator::new(store.clone(), dispatcher.clone());

    let pipeline = store
        .create_pipeline(
            custom_pipeline("hourly", &[("Load", "load", 0)])
                .with_schedule(Schedule::Interval { every_secs: 3600 }),
        )
        .await
        .unwrap();

    let jobs = evaluator.tick(at(2024, 5, 14, 9, 0, 0)).await;
    dispatcher.drain().await;

    let run = store.get_run(jobs[0].run_id).await.unwrap().unwrap();
    assert_eq!(run.pipeline_id, pipeline.id);
    assert_run_status(&run, RunStatus::Completed);
    assert_eq!(*calls.lock().unwrap(), vec!["load"]);
}
