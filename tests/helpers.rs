//! Test utility functions for mlpipe

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mlpipe::core::{ContextValue, ExecutionContext, StepError};
use mlpipe::execution::{Dispatcher, ExecutionEvent, PipelineEngine, RunJob};
use mlpipe::persistence::{InMemoryStore, PipelineStore};
use mlpipe::steps::{ConnectorRegistry, MemoryConnector, StepHandler, StepRegistry, StepServices};
use mlpipe::{PipelineDefinition, PipelineError, PipelineRun, PipelineStep, RunStatus, StepType, Table};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Handler that records every call and stores its step name under `last_step`
pub struct RecordingHandler {
    name: String,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    pub fn new(name: &str, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            calls,
        }
    }
}

#[async_trait]
impl StepHandler for RecordingHandler {
    async fn execute(&self, context: &mut ExecutionContext, _config: &Value) -> Result<(), StepError> {
        self.calls.lock().unwrap().push(self.name.clone());
        context.insert("last_step", ContextValue::Text(self.name.clone()));
        context.note(&format!("{} done", self.name));
        Ok(())
    }
}

/// Handler that always fails with `message`
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl StepHandler for FailingHandler {
    async fn execute(&self, _context: &mut ExecutionContext, _config: &Value) -> Result<(), StepError> {
        Err(StepError::Execution(anyhow::anyhow!(self.message.clone())))
    }
}

/// Dispatcher that only remembers what it was given
#[derive(Default)]
pub struct RecordingDispatcher {
    pub jobs: Mutex<Vec<RunJob>>,
}

impl RecordingDispatcher {
    pub fn submitted(&self) -> Vec<RunJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn submit(&self, job: RunJob) -> anyhow::Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Custom step type named `name`
pub fn custom(name: &str) -> StepType {
    StepType::Custom(name.to_string())
}

/// Registry with one recording handler per name, plus a `fail` type
pub fn recording_registry(names: &[&str], calls: Arc<Mutex<Vec<String>>>) -> StepRegistry {
    let mut registry = StepRegistry::new();
    for name in names {
        registry.register(custom(name), Arc::new(RecordingHandler::new(name, calls.clone())));
    }
    registry.register(custom("fail"), Arc::new(FailingHandler::new("boom")));
    registry
}

/// Pipeline of custom steps, one per `(name, type, order)`
pub fn custom_pipeline(name: &str, steps: &[(&str, &str, u32)]) -> PipelineDefinition {
    PipelineDefinition::new(
        name,
        steps
            .iter()
            .map(|(step, kind, order)| PipelineStep::new(*step, custom(kind), *order, json!({})))
            .collect(),
    )
}

/// 20 customers, every fourth one churned
pub fn customers_table() -> Table {
    let rows = (0..20)
        .map(|i| {
            vec![
                json!(i + 1),
                json!(20.0 + i as f64 * 2.5),
                json!(if i % 4 == 0 { 1 } else { 0 }),
            ]
        })
        .collect();
    Table::from_rows(
        vec![
            "tenure".to_string(),
            "monthly_charges".to_string(),
            "churned".to_string(),
        ],
        rows,
    )
    .unwrap()
}

/// Built-in handlers wired to an in-memory `warehouse` database
pub async fn warehouse_services() -> (StepServices, Arc<MemoryConnector>) {
    let warehouse = Arc::new(MemoryConnector::new());
    warehouse.insert_table("customers", customers_table()).await;

    let mut connectors = ConnectorRegistry::new();
    connectors.register_memory("warehouse", warehouse.clone());
    (StepServices::new().with_connectors(connectors), warehouse)
}

pub fn warehouse() -> Value {
    json!({"type": "memory", "name": "warehouse"})
}

/// Extraction, preprocessing, training, prediction and save over the warehouse
pub fn churn_pipeline() -> PipelineDefinition {
    PipelineDefinition::new(
        "churn",
        vec![
            PipelineStep::new(
                "Load customers",
                StepType::Extraction,
                0,
                json!({"database": warehouse(), "query": "SELECT * FROM customers"}),
            ),
            PipelineStep::new(
                "Scale features",
                StepType::Preprocessing,
                1,
                json!({"target_col": "churned", "test_fraction": 0.25}),
            ),
            PipelineStep::new(
                "Train baseline",
                StepType::Training,
                2,
                json!({
                    "model": {"task_type": "classification", "name": "majority"},
                    "tracking": {"experiment_name": "churn"}
                }),
            ),
            PipelineStep::new("Predict", StepType::Prediction, 3, json!({})),
            PipelineStep::new(
                "Store predictions",
                StepType::Save,
                4,
                json!({"database": warehouse(), "table_name": "predictions"}),
            ),
        ],
    )
}

/// Engine over a fresh in-memory store
pub fn setup_engine(registry: StepRegistry) -> (Arc<InMemoryStore>, PipelineEngine) {
    let store = Arc::new(InMemoryStore::new());
    let engine = PipelineEngine::new(store.clone(), Arc::new(registry));
    (store, engine)
}

/// Create a run for `pipeline_id`, execute it and reload it
pub async fn run_once(
    store: &dyn PipelineStore,
    engine: &PipelineEngine,
    pipeline_id: uuid::Uuid,
) -> (Result<uuid::Uuid, PipelineError>, PipelineRun) {
    let run = store.create_run(pipeline_id).await.unwrap();
    let result = engine.run(run.id).await;
    let run = store.get_run(run.id).await.unwrap().unwrap();
    (result, run)
}

/// Collect every event the engine emits
pub async fn capture_events(engine: &PipelineEngine) -> Arc<Mutex<Vec<ExecutionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;
    events
}

pub fn assert_run_status(run: &PipelineRun, expected: RunStatus) {
    assert_eq!(
        run.status, expected,
        "run {} ended {} instead of {}; logs:\n{}",
        run.id, run.status, expected, run.logs
    );
    assert_eq!(run.completed_at.is_some(), expected.is_terminal());
}

/// Messages of the run log, without timestamps
pub fn log_messages(run: &PipelineRun) -> Vec<String> {
    run.logs
        .lines()
        .map(|line| match line.find("] ") {
            Some(idx) => line[idx + 2..].to_string(),
            None => line.to_string(),
        })
        .collect()
}

/// Assert that `expected` messages appear in the run log in this order
pub fn assert_log_order(run: &PipelineRun, expected: &[&str]) {
    let messages = log_messages(run);
    let mut position = 0;
    for wanted in expected {
        match messages[position..].iter().position(|m| m.contains(wanted)) {
            Some(offset) => position += offset + 1,
            None => panic!("log line {:?} missing or out of order in:\n{}", wanted, run.logs),
        }
    }
}

/// UTC timestamp helper
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_messages_strip_timestamps() {
        let mut run = PipelineRun::new(uuid::Uuid::new_v4());
        run.append_log("first");
        run.append_log("second");
        assert_eq!(log_messages(&run), vec!["first", "second"]);
        assert_log_order(&run, &["first", "second"]);
    }

    #[test]
    fn test_customers_fixture() {
        let table = customers_table();
        assert_eq!(table.len(), 20);
        assert_eq!(table.column("churned").unwrap().iter().filter(|v| **v == json!(1)).count(), 5);
    }
}
