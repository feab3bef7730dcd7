//! Execution context - the state threaded through the steps of one run

use crate::core::{error::StepError, table::Table};
use crate::steps::{models::Model, plugins::FittedPreprocessor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Well-known context keys and the steps that produce them
pub mod keys {
    /// Working data set (extraction, inference preprocessing, prediction)
    pub const DATA: &str = "data";
    /// Training features (preprocessing)
    pub const X_TRAIN: &str = "X_train";
    /// Held-out features (preprocessing)
    pub const X_TEST: &str = "X_test";
    /// Training targets (preprocessing)
    pub const Y_TRAIN: &str = "y_train";
    /// Held-out targets (preprocessing)
    pub const Y_TEST: &str = "y_test";
    /// Fitted model (training)
    pub const MODEL: &str = "model";
    /// Fitted preprocessing state (preprocessing)
    pub const PREPROCESSOR: &str = "preprocessor";
    /// Tracking run id (training)
    pub const RUN_ID: &str = "run_id";
    /// `classification`, `regression`, ... (training)
    pub const TASK_TYPE: &str = "task_type";
}

/// A typed value stored in the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Table(Table),
    Series(Vec<Value>),
    Model(Model),
    Preprocessor(FittedPreprocessor),
    Text(String),
    Json(Value),
}

impl ContextValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Table(_) => "a table",
            ContextValue::Series(_) => "a series",
            ContextValue::Model(_) => "a model",
            ContextValue::Preprocessor(_) => "a preprocessor",
            ContextValue::Text(_) => "text",
            ContextValue::Json(_) => "json",
        }
    }
}

/// Execution context for one pipeline run
///
/// Created empty at run start and handed to each step in turn. Handlers
/// check for the keys they need and fail with `MissingInput` otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    values: BTreeMap<String, ContextValue>,

    /// Progress notes from the current step, drained into the run log
    #[serde(skip)]
    notes: Vec<String>,
}

impl ExecutionContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: ContextValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value or fail with `MissingInput`
    pub fn require(&self, key: &str) -> Result<&ContextValue, StepError> {
        self.values.get(key).ok_or_else(|| StepError::missing(key))
    }

    pub fn table(&self, key: &str) -> Result<&Table, StepError> {
        match self.require(key)? {
            ContextValue::Table(table) => Ok(table),
            _ => Err(mismatch(key, "a table")),
        }
    }

    pub fn series(&self, key: &str) -> Result<&[Value], StepError> {
        match self.require(key)? {
            ContextValue::Series(values) => Ok(values),
            _ => Err(mismatch(key, "a series")),
        }
    }

    pub fn model(&self, key: &str) -> Result<&Model, StepError> {
        match self.require(key)? {
            ContextValue::Model(model) => Ok(model),
            _ => Err(mismatch(key, "a model")),
        }
    }

    pub fn preprocessor(&self, key: &str) -> Result<&FittedPreprocessor, StepError> {
        match self.require(key)? {
            ContextValue::Preprocessor(fitted) => Ok(fitted),
            _ => Err(mismatch(key, "a preprocessor")),
        }
    }

    pub fn text(&self, key: &str) -> Result<&str, StepError> {
        match self.require(key)? {
            ContextValue::Text(text) => Ok(text),
            _ => Err(mismatch(key, "text")),
        }
    }

    /// Like `text`, but `None` when the key is absent
    pub fn optional_text(&self, key: &str) -> Result<Option<&str>, StepError> {
        if self.contains(key) {
            self.text(key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Record a progress line for the run log
    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    /// Take all notes recorded since the last call
    pub fn take_notes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notes)
    }
}

fn mismatch(key: &str, expected: &'static str) -> StepError {
    StepError::TypeMismatch {
        key: key.to_string(),
        expected,
    }
}
