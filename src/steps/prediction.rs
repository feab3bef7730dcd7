//! Prediction step
//!
//! Config: `{model_path?}`.
//!
//! Input rows come from `X_test` when present, otherwise from `data`
//! (transformed through `preprocessor` if one is in the context). The model is
//! loaded from `model_path` (a JSON model file) or taken from `model`.
//!
//! Writes `data`: the input rows (the untransformed `data` rows in inference
//! mode) plus `prediction`, `prediction_time`, `run_id` (when known) and
//! `model_type` columns.

use crate::core::{
    context::{keys, ContextValue, ExecutionContext},
    error::StepError,
};
use crate::steps::{
    models::Model, plugins::PreprocessorRegistry, preprocessing::apply_fitted, StepHandler,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

pub struct PredictionStep {
    plugins: Arc<PreprocessorRegistry>,
}

impl PredictionStep {
    pub fn new(plugins: Arc<PreprocessorRegistry>) -> Self {
        Self { plugins }
    }
}

#[async_trait]
impl StepHandler for PredictionStep {
    async fn execute(&self, context: &mut ExecutionContext, config: &Value) -> Result<(), StepError> {
        let (features, mut result) = if context.contains(keys::X_TEST) {
            context.note("Using X_test from training for prediction.");
            let x_test = context.table(keys::X_TEST)?.clone();
            (x_test.clone(), x_test)
        } else if context.contains(keys::DATA) {
            let data = context.table(keys::DATA)?.clone();
            if context.contains(keys::PREPROCESSOR) {
                context.note("Applying preprocessor to input data.");
                let fitted = context.preprocessor(keys::PREPROCESSOR)?.clone();
                let transformed = apply_fitted(&self.plugins, &fitted, &data).await?;
                (transformed, data)
            } else {
                (data.clone(), data)
            }
        } else {
            return Err(StepError::missing(keys::DATA));
        };

        let model = match config.get("model_path").and_then(Value::as_str) {
            Some(path) => Model::load(path).await?,
            None => context.model(keys::MODEL)?.clone(),
        };

        let predictions = model.predict(features.len());
        let rows = result.len();
        result.set_column("prediction", predictions)?;
        result.set_column(
            "prediction_time",
            vec![Value::from(Utc::now().to_rfc3339()); rows],
        )?;
        if let Some(run_id) = context.optional_text(keys::RUN_ID)? {
            result.set_column("run_id", vec![Value::from(run_id); rows])?;
        }
        result.set_column("model_type", vec![Value::from(model.type_name()); rows])?;

        context.note("Prediction completed.");
        context.insert(keys::DATA, ContextValue::Table(result));
        Ok(())
    }
}
