//! Preprocessing plugins and their versioned registry
//!
//! Plugins are registered by name. Registering a name again replaces the
//! plugin and bumps its version; that is the only way a plugin is reloaded.
//! The fitted state a plugin produces is plain JSON, so it can be cached with
//! the rest of the execution context.

use crate::core::table::Table;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name of the plugin used when a step does not pick one
pub const DEFAULT_PLUGIN: &str = "standard_scaler";

/// Trait for feature preprocessing
pub trait PreprocessorPlugin: Send + Sync {
    /// Learn the transformation from training features
    fn fit(&self, features: &Table) -> Result<Value>;

    /// Apply a fitted transformation
    fn transform(&self, state: &Value, features: &Table) -> Result<Table>;
}

/// Fitted preprocessing state stored in the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    /// Plugin that produced the state
    pub plugin: String,

    /// Plugin version at fit time
    pub version: u32,

    /// Plugin-specific fitted parameters
    pub state: Value,
}

/// A plugin as currently registered
#[derive(Clone)]
pub struct LoadedPlugin {
    pub name: String,
    pub version: u32,
    pub plugin: Arc<dyn PreprocessorPlugin>,
}

impl LoadedPlugin {
    /// Fit and wrap the state with this plugin's name and version
    pub fn fit(&self, features: &Table) -> Result<FittedPreprocessor> {
        let state = self
            .plugin
            .fit(features)
            .with_context(|| format!("plugin '{}' failed to fit", self.name))?;
        Ok(FittedPreprocessor {
            plugin: self.name.clone(),
            version: self.version,
            state,
        })
    }
}

/// Versioned registry of preprocessing plugins
#[derive(Default)]
pub struct PreprocessorRegistry {
    plugins: RwLock<HashMap<String, (u32, Arc<dyn PreprocessorPlugin>)>>,
}

impl PreprocessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `standard_scaler` at version 1
    pub fn with_builtins() -> Self {
        let mut plugins: HashMap<String, (u32, Arc<dyn PreprocessorPlugin>)> = HashMap::new();
        plugins.insert(DEFAULT_PLUGIN.to_string(), (1, Arc::new(StandardScaler)));
        Self {
            plugins: RwLock::new(plugins),
        }
    }

    /// Register or replace a plugin, returning its new version
    pub async fn register(&self, name: &str, plugin: Arc<dyn PreprocessorPlugin>) -> u32 {
        let mut plugins = self.plugins.write().await;
        let version = plugins.get(name).map(|(v, _)| v + 1).unwrap_or(1);
        plugins.insert(name.to_string(), (version, plugin));
        tracing::info!("Registered preprocessing plugin {} v{}", name, version);
        version
    }

    /// Current plugin and version for `name`
    pub async fn load(&self, name: &str) -> Result<LoadedPlugin> {
        let plugins = self.plugins.read().await;
        let (version, plugin) = plugins
            .get(name)
            .with_context(|| format!("unknown preprocessing plugin '{}'", name))?;
        Ok(LoadedPlugin {
            name: name.to_string(),
            version: *version,
            plugin: plugin.clone(),
        })
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.plugins.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Standardizes numeric columns to zero mean and unit variance
///
/// Non-numeric columns pass through. A constant column is only centered.
pub struct StandardScaler;

impl PreprocessorPlugin for StandardScaler {
    fn fit(&self, features: &Table) -> Result<Value> {
        let mut columns = Map::new();
        for name in features.columns() {
            if !features.is_numeric_column(name) {
                continue;
            }
            let values: Vec<f64> = features
                .column(name)?
                .iter()
                .filter_map(Value::as_f64)
                .collect();
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            columns.insert(name.clone(), json!({"mean": mean, "std": variance.sqrt()}));
        }
        Ok(json!({ "columns": columns }))
    }

    fn transform(&self, state: &Value, features: &Table) -> Result<Table> {
        let fitted = state
            .get("columns")
            .and_then(Value::as_object)
            .context("standard_scaler state has no 'columns'")?;

        let mut out = features.clone();
        for (name, params) in fitted {
            let mean = params.get("mean").and_then(Value::as_f64).unwrap_or(0.0);
            let std = params.get("std").and_then(Value::as_f64).unwrap_or(0.0);
            let values = features
                .column(name)
                .with_context(|| format!("column '{}' seen during fit is missing", name))?;
            let scaled = values
                .into_iter()
                .map(|v| match v.as_f64() {
                    Some(x) if std > 0.0 => json!((x - mean) / std),
                    Some(x) => json!(x - mean),
                    None => v,
                })
                .collect();
            out.set_column(name, scaled)?;
        }
        Ok(out)
    }
}
