//! Preprocessing step
//!
//! Config: `{plugin: "standard_scaler", target_col?, test_fraction?: 0.2}`.
//!
//! With `target_col` (training mode) reads `data` and writes `X_train`,
//! `X_test`, `y_train`, `y_test` and `preprocessor`. The split is
//! deterministic: the last `test_fraction` of the rows are held out.
//!
//! Without `target_col` (inference mode) `data` is replaced by its transformed
//! version, using the context's `preprocessor` when one is present.

use crate::core::{
    context::{keys, ContextValue, ExecutionContext},
    error::StepError,
    table::Table,
};
use crate::steps::{
    plugins::{FittedPreprocessor, PreprocessorRegistry, DEFAULT_PLUGIN},
    StepHandler,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_TEST_FRACTION: f64 = 0.2;

pub struct PreprocessingStep {
    plugins: Arc<PreprocessorRegistry>,
}

impl PreprocessingStep {
    pub fn new(plugins: Arc<PreprocessorRegistry>) -> Self {
        Self { plugins }
    }
}

/// Number of held-out rows for `len` rows; keeps at least one training row
fn test_rows(len: usize, fraction: f64) -> usize {
    if len < 2 {
        return 0;
    }
    let held_out = (len as f64 * fraction).round() as usize;
    held_out.min(len - 1)
}

#[async_trait]
impl StepHandler for PreprocessingStep {
    async fn execute(&self, context: &mut ExecutionContext, config: &Value) -> Result<(), StepError> {
        let data = context.table(keys::DATA)?.clone();
        let plugin_name = config
            .get("plugin")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PLUGIN);

        match config.get("target_col").and_then(Value::as_str) {
            Some(target) => {
                let fraction = config
                    .get("test_fraction")
                    .and_then(Value::as_f64)
                    .unwrap_or(DEFAULT_TEST_FRACTION);
                if !(0.0..1.0).contains(&fraction) {
                    return Err(StepError::config("'test_fraction' must be in [0, 1)"));
                }

                let mut features = data;
                let targets = features.drop_column(target)?;
                let split = features.len() - test_rows(features.len(), fraction);

                let x_train = features.slice(0, split);
                let x_test = features.slice(split, features.len());
                let y_train = targets[..split].to_vec();
                let y_test = targets[split..].to_vec();

                let plugin = self.plugins.load(plugin_name).await?;
                let fitted = plugin.fit(&x_train)?;
                let x_train = plugin.plugin.transform(&fitted.state, &x_train)?;
                let x_test = plugin.plugin.transform(&fitted.state, &x_test)?;

                context.note(format!(
                    "Preprocessed with {} v{}: {} training rows, {} test rows.",
                    fitted.plugin,
                    fitted.version,
                    x_train.len(),
                    x_test.len()
                ));
                context.insert(keys::X_TRAIN, ContextValue::Table(x_train));
                context.insert(keys::X_TEST, ContextValue::Table(x_test));
                context.insert(keys::Y_TRAIN, ContextValue::Series(y_train));
                context.insert(keys::Y_TEST, ContextValue::Series(y_test));
                context.insert(keys::PREPROCESSOR, ContextValue::Preprocessor(fitted));
            }
            None => {
                let transformed = if context.contains(keys::PREPROCESSOR) {
                    let fitted = context.preprocessor(keys::PREPROCESSOR)?.clone();
                    apply_fitted(&self.plugins, &fitted, &data).await?
                } else {
                    let plugin = self.plugins.load(plugin_name).await?;
                    let fitted = plugin.fit(&data)?;
                    let transformed = plugin.plugin.transform(&fitted.state, &data)?;
                    context.insert(keys::PREPROCESSOR, ContextValue::Preprocessor(fitted));
                    transformed
                };
                context.note(format!("Preprocessed {} rows for inference.", transformed.len()));
                context.insert(keys::DATA, ContextValue::Table(transformed));
            }
        }
        Ok(())
    }
}

/// Transform `table` with previously fitted state
pub(crate) async fn apply_fitted(
    plugins: &PreprocessorRegistry,
    fitted: &FittedPreprocessor,
    table: &Table,
) -> Result<Table, StepError> {
    let plugin = plugins.load(&fitted.plugin).await?;
    if plugin.version != fitted.version {
        tracing::warn!(
            "Preprocessor {} was fitted with v{} but v{} is registered",
            fitted.plugin,
            fitted.version,
            plugin.version
        );
    }
    Ok(plugin.plugin.transform(&fitted.state, table)?)
}
