//! Data connectors used by extraction and save steps
//!
//! A step names its database with a `database` object whose `type` picks the
//! connector:
//!
//! ```yaml
//! database:
//!   type: sqlite
//!   path: warehouse.db
//! ```
//!
//! `memory` databases are named fixture stores registered up front, used by
//! tests and dry runs.

use crate::core::table::Table;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

/// Trait for reading and writing tabular data
#[async_trait]
pub trait DataConnector: Send + Sync {
    /// Run a query and return its rows
    async fn fetch(&self, query: &str) -> Result<Table>;

    /// Append rows to `table_name`, creating it if needed
    async fn save(&self, table: &Table, table_name: &str) -> Result<()>;
}

/// Opens a connector from a `database` config object
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn open(&self, database: &Value) -> Result<Arc<dyn DataConnector>>;
}

/// Maps `database.type` to connector factories
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, Arc<dyn ConnectorFactory>>,
    memory: HashMap<String, Arc<MemoryConnector>>,
}

impl ConnectorRegistry {
    /// Create an empty registry (only `memory` databases)
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `sqlite` connector
    pub fn with_builtins() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "sqlite")]
        registry.register("sqlite", Arc::new(sqlite::SqliteFactory));
        registry
    }

    pub fn register(&mut self, kind: &str, factory: Arc<dyn ConnectorFactory>) {
        self.factories.insert(kind.to_ascii_lowercase(), factory);
    }

    /// Make a named in-memory database available as `{type: memory, name: ...}`
    pub fn register_memory(&mut self, name: &str, connector: Arc<MemoryConnector>) {
        self.memory.insert(name.to_string(), connector);
    }

    /// Open the connector described by `database`
    pub async fn open(&self, database: &Value) -> Result<Arc<dyn DataConnector>> {
        let kind = database
            .get("type")
            .and_then(Value::as_str)
            .context("database config requires 'type'")?
            .to_ascii_lowercase();

        if kind == "memory" {
            let name = database.get("name").and_then(Value::as_str).unwrap_or("default");
            let connector = self
                .memory
                .get(name)
                .with_context(|| format!("no in-memory database named '{}'", name))?;
            return Ok(connector.clone());
        }

        let factory = self
            .factories
            .get(&kind)
            .with_context(|| format!("Unsupported database type: {}", kind))?;
        factory.open(database).await
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

fn select_all_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*select\s+\*\s+from\s+([A-Za-z_][A-Za-z0-9_]*)\s*;?\s*$")
            .expect("valid select regex")
    })
}

/// Reject table and column names that cannot be used unquoted
pub fn check_identifier(name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        anyhow::bail!("'{}' is not a valid table or column name", name)
    }
}

/// In-memory database of named tables
///
/// `fetch` accepts either a table name or `SELECT * FROM <table>`.
#[derive(Default)]
pub struct MemoryConnector {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_table(&self, name: &str, table: Table) {
        self.tables.write().await.insert(name.to_string(), table);
    }

    pub async fn table(&self, name: &str) -> Option<Table> {
        self.tables.read().await.get(name).cloned()
    }
}

#[async_trait]
impl DataConnector for MemoryConnector {
    async fn fetch(&self, query: &str) -> Result<Table> {
        let name = match select_all_pattern().captures(query) {
            Some(caps) => caps[1].to_string(),
            None => query.trim().to_string(),
        };
        self.table(&name)
            .await
            .with_context(|| format!("no such table: {}", name))
    }

    async fn save(&self, table: &Table, table_name: &str) -> Result<()> {
        check_identifier(table_name)?;
        let mut tables = self.tables.write().await;
        match tables.get_mut(table_name) {
            Some(existing) => {
                if existing.columns() != table.columns() {
                    anyhow::bail!(
                        "table {} has columns {:?}, cannot append {:?}",
                        table_name,
                        existing.columns(),
                        table.columns()
                    );
                }
                for row in table.rows() {
                    existing.push_row(row.clone())?;
                }
            }
            None => {
                tables.insert(table_name.to_string(), table.clone());
            }
        }
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! SQLite connector

    use super::{check_identifier, ConnectorFactory, DataConnector};
    use crate::core::table::Table;
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use serde_json::Value;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
    use sqlx::{Column, Row, TypeInfo, ValueRef};
    use std::str::FromStr;
    use std::sync::Arc;

    /// Opens `{type: sqlite, path: ...}` databases
    pub struct SqliteFactory;

    #[async_trait]
    impl ConnectorFactory for SqliteFactory {
        async fn open(&self, database: &Value) -> Result<Arc<dyn DataConnector>> {
            let path = database
                .get("path")
                .and_then(Value::as_str)
                .context("sqlite database config requires 'path'")?;
            Ok(Arc::new(SqliteConnector::connect(path).await?))
        }
    }

    /// Connector over one SQLite database file
    pub struct SqliteConnector {
        pool: SqlitePool,
    }

    impl SqliteConnector {
        pub async fn connect(path: &str) -> Result<Self> {
            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
                .create_if_missing(true);
            let pool = SqlitePool::connect_with(options)
                .await
                .with_context(|| format!("Failed to open database {}", path))?;
            Ok(Self { pool })
        }

        pub fn from_pool(pool: SqlitePool) -> Self {
            Self { pool }
        }

        fn decode(row: &SqliteRow, idx: usize) -> Result<Value> {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                return Ok(Value::Null);
            }
            let type_name = raw.type_info().name().to_string();
            let value = match type_name.as_str() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" => Value::from(row.try_get::<f64, _>(idx)?),
                "BOOLEAN" => Value::from(row.try_get::<bool, _>(idx)?),
                "BLOB" => {
                    let bytes = row.try_get::<Vec<u8>, _>(idx)?;
                    Value::from(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::from(row.try_get::<String, _>(idx)?),
            };
            Ok(value)
        }
    }

    #[async_trait]
    impl DataConnector for SqliteConnector {
        async fn fetch(&self, query: &str) -> Result<Table> {
            let rows = sqlx::query(query)
                .fetch_all(&self.pool)
                .await
                .context("Failed to run extraction query")?;

            let columns: Vec<String> = match rows.first() {
                Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
                None => Vec::new(),
            };

            let mut table = Table::new(columns);
            for row in &rows {
                let values = (0..row.len())
                    .map(|idx| Self::decode(row, idx))
                    .collect::<Result<Vec<_>>>()?;
                table.push_row(values)?;
            }
            Ok(table)
        }

        async fn save(&self, table: &Table, table_name: &str) -> Result<()> {
            check_identifier(table_name)?;
            for column in table.columns() {
                check_identifier(column)?;
            }
            if table.columns().is_empty() {
                anyhow::bail!("cannot save a table without columns to {}", table_name);
            }

            let column_list = table
                .columns()
                .iter()
                .map(|c| format!("\"{}\"", c))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (1..=table.columns().len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");

            let mut tx = self.pool.begin().await?;

            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
                table_name, column_list
            ))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to create table {}", table_name))?;

            let insert = format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                table_name, column_list, placeholders
            );
            for row in table.rows() {
                let mut query = sqlx::query(&insert);
                for value in row {
                    query = match value {
                        Value::Null => query.bind(None::<String>),
                        Value::Bool(b) => query.bind(*b),
                        Value::Number(n) => match n.as_i64() {
                            Some(i) => query.bind(i),
                            None => query.bind(n.as_f64().unwrap_or_default()),
                        },
                        Value::String(s) => query.bind(s.clone()),
                        other => query.bind(other.to_string()),
                    };
                }
                query
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to insert into {}", table_name))?;
            }

            tx.commit().await?;
            Ok(())
        }
    }

}
