//! Built-in baseline models and metrics

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// What a model predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Classification,
    Regression,
}

impl TaskType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classification" => Ok(TaskType::Classification),
            "regression" => Ok(TaskType::Regression),
            other => anyhow::bail!("unsupported task type '{}'", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Classification => "classification",
            TaskType::Regression => "regression",
        }
    }

    /// Name of the evaluation metric for this task
    pub fn metric_name(&self) -> &'static str {
        match self {
            TaskType::Classification => "accuracy",
            TaskType::Regression => "mse",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fitted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Model {
    /// Always predicts the most frequent training label
    MajorityClassifier { label: Value },
    /// Always predicts the mean training target
    MeanRegressor { mean: f64 },
}

impl Model {
    /// Fit the model named `name` (or the task's default) on `targets`
    pub fn fit(task_type: TaskType, name: Option<&str>, targets: &[Value]) -> Result<Self> {
        if targets.is_empty() {
            anyhow::bail!("cannot fit a model on an empty training set");
        }

        let name = name.map(|n| n.trim().to_ascii_lowercase());
        match (task_type, name.as_deref()) {
            (TaskType::Classification, None | Some("majority") | Some("majorityclassifier")) => {
                Ok(Model::MajorityClassifier {
                    label: majority(targets),
                })
            }
            (TaskType::Regression, None | Some("mean") | Some("meanregressor")) => {
                let numbers = targets
                    .iter()
                    .map(|v| v.as_f64().context("regression targets must be numeric"))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Model::MeanRegressor {
                    mean: numbers.iter().sum::<f64>() / numbers.len() as f64,
                })
            }
            (task, Some(other)) => anyhow::bail!("unknown {} model '{}'", task, other),
        }
    }

    /// Predict one value per input row
    pub fn predict(&self, rows: usize) -> Vec<Value> {
        let value = match self {
            Model::MajorityClassifier { label } => label.clone(),
            Model::MeanRegressor { mean } => Value::from(*mean),
        };
        vec![value; rows]
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Model::MajorityClassifier { .. } => TaskType::Classification,
            Model::MeanRegressor { .. } => TaskType::Regression,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Model::MajorityClassifier { .. } => "MajorityClassifier",
            Model::MeanRegressor { .. } => "MeanRegressor",
        }
    }

    /// Load a model saved as JSON
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse model file {}", path.display()))
    }

    /// Score predictions with the task's metric
    pub fn evaluate(&self, actual: &[Value], predicted: &[Value]) -> Result<f64> {
        match self.task_type() {
            TaskType::Classification => accuracy(actual, predicted),
            TaskType::Regression => mean_squared_error(actual, predicted),
        }
    }
}

/// Most frequent value; ties go to the value seen first
fn majority(values: &[Value]) -> Value {
    let mut counts: Vec<(&Value, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&Value, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v.clone()).unwrap_or(Value::Null)
}

fn check_lengths(actual: &[Value], predicted: &[Value]) -> Result<()> {
    if actual.len() != predicted.len() {
        anyhow::bail!(
            "{} targets but {} predictions",
            actual.len(),
            predicted.len()
        );
    }
    if actual.is_empty() {
        anyhow::bail!("cannot evaluate on an empty set");
    }
    Ok(())
}

/// Fraction of exact matches
pub fn accuracy(actual: &[Value], predicted: &[Value]) -> Result<f64> {
    check_lengths(actual, predicted)?;
    let hits = actual.iter().zip(predicted).filter(|(a, p)| a == p).count();
    Ok(hits as f64 / actual.len() as f64)
}

pub fn mean_squared_error(actual: &[Value], predicted: &[Value]) -> Result<f64> {
    check_lengths(actual, predicted)?;
    let mut total = 0.0;
    for (a, p) in actual.iter().zip(predicted) {
        let a = a.as_f64().context("regression targets must be numeric")?;
        let p = p.as_f64().context("predictions must be numeric")?;
        total += (a - p).powi(2);
    }
    Ok(total / actual.len() as f64)
}
