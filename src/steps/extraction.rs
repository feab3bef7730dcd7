//! Extraction step
//!
//! Config: `{database: {type, ...}, query}`.
//! Reads: nothing. Writes: `data`.

use crate::core::{
    context::{keys, ContextValue, ExecutionContext},
    error::StepError,
};
use crate::steps::{config_object, config_str, ConnectorRegistry, StepHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct ExtractionStep {
    connectors: Arc<ConnectorRegistry>,
}

impl ExtractionStep {
    pub fn new(connectors: Arc<ConnectorRegistry>) -> Self {
        Self { connectors }
    }
}

#[async_trait]
impl StepHandler for ExtractionStep {
    async fn execute(&self, context: &mut ExecutionContext, config: &Value) -> Result<(), StepError> {
        let database = config_object(config, "database")?;
        let query = config_str(config, "query")?;

        let connector = self.connectors.open(database).await?;
        let table = connector.fetch(query).await?;

        tracing::debug!("Extraction returned {} rows", table.len());
        context.note(format!("Extracted {} rows.", table.len()));
        context.insert(keys::DATA, ContextValue::Table(table));
        Ok(())
    }
}
