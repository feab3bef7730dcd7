//! Save step
//!
//! Config: `{database: {type, ...}, table_name}`.
//! Reads: `data`. Rows are appended to `table_name`.

use crate::core::{
    context::{keys, ExecutionContext},
    error::StepError,
};
use crate::steps::{config_object, config_str, ConnectorRegistry, StepHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct SaveStep {
    connectors: Arc<ConnectorRegistry>,
}

impl SaveStep {
    pub fn new(connectors: Arc<ConnectorRegistry>) -> Self {
        Self { connectors }
    }
}

#[async_trait]
impl StepHandler for SaveStep {
    async fn execute(&self, context: &mut ExecutionContext, config: &Value) -> Result<(), StepError> {
        let data = context.table(keys::DATA)?;
        let database = config_object(config, "database")?;
        let table_name = config_str(config, "table_name")?;

        let connector = self.connectors.open(database).await?;
        connector.save(data, table_name).await?;

        let saved = data.len();
        context.note(format!("Saved {} rows to {}.", saved, table_name));
        Ok(())
    }
}
