//! Training step
//!
//! Config: `{model: {task_type, name?, params?}, tracking?: {experiment_name}}`.
//! Reads: `X_train`, `y_train`, and `X_test` + `y_test` for evaluation when
//! both are present and the test split is not empty. Writes: `task_type`,
//! `model`, `run_id`.

use crate::core::{
    context::{keys, ContextValue, ExecutionContext},
    error::StepError,
};
use crate::steps::{
    models::{Model, TaskType},
    ExperimentTracker, StepHandler,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_EXPERIMENT: &str = "Default";

pub struct TrainingStep {
    tracker: Arc<dyn ExperimentTracker>,
}

impl TrainingStep {
    pub fn new(tracker: Arc<dyn ExperimentTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl StepHandler for TrainingStep {
    async fn execute(&self, context: &mut ExecutionContext, config: &Value) -> Result<(), StepError> {
        let x_train = context.table(keys::X_TRAIN)?;
        let y_train = context.series(keys::Y_TRAIN)?.to_vec();
        if x_train.len() != y_train.len() {
            return Err(StepError::config(format!(
                "X_train has {} rows but y_train has {} values",
                x_train.len(),
                y_train.len()
            )));
        }

        let model_config = config.get("model").cloned().unwrap_or_else(|| json!({}));
        let task_type = TaskType::parse(
            model_config
                .get("task_type")
                .and_then(Value::as_str)
                .unwrap_or("classification"),
        )?;
        let model_name = model_config.get("name").and_then(Value::as_str);
        let params = model_config.get("params").cloned().unwrap_or_else(|| json!({}));
        let experiment = config
            .pointer("/tracking/experiment_name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_EXPERIMENT);

        let evaluation = match (context.get(keys::X_TEST), context.get(keys::Y_TEST)) {
            (Some(_), Some(_)) => Some((
                context.table(keys::X_TEST)?.len(),
                context.series(keys::Y_TEST)?.to_vec(),
            )),
            _ => None,
        }
        .filter(|(_, y_test)| !y_test.is_empty());

        let run_id = self.tracker.start_run(experiment).await?;
        self.tracker.log_params(&run_id, &params).await?;

        let model = Model::fit(task_type, model_name, &y_train)?;

        if let Some((test_rows, y_test)) = evaluation {
            let predictions = model.predict(test_rows);
            let score = model.evaluate(&y_test, &predictions)?;
            self.tracker
                .log_metric(&run_id, task_type.metric_name(), score)
                .await?;
            match task_type {
                TaskType::Classification => context.note(format!("Model Accuracy: {}", score)),
                TaskType::Regression => context.note(format!("Model MSE: {}", score)),
            }
        }

        context.note(format!("Training completed. Run ID: {}", run_id));
        context.insert(keys::TASK_TYPE, ContextValue::Text(task_type.as_str().to_string()));
        context.insert(keys::MODEL, ContextValue::Model(model));
        context.insert(keys::RUN_ID, ContextValue::Text(run_id));
        Ok(())
    }
}
