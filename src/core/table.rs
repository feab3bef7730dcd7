//! Tabular data passed between steps

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by table operations
#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("row has {actual} values but the table has {expected} columns")]
    RowWidth { expected: usize, actual: usize },

    #[error("column '{column}' has {actual} values but the table has {expected} rows")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

/// A row-oriented table of JSON values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from columns and rows, checking every row's width
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, TableError> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, top to bottom
    pub fn column(&self, name: &str) -> Result<Vec<Value>, TableError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|row| row[idx].clone()).collect())
    }

    /// Remove a column and return its values
    pub fn drop_column(&mut self, name: &str) -> Result<Vec<Value>, TableError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        self.columns.remove(idx);
        Ok(self.rows.iter_mut().map(|row| row.remove(idx)).collect())
    }

    /// Append a column, or replace it if a column with that name exists
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), TableError> {
        if values.len() != self.rows.len() {
            return Err(TableError::ColumnLength {
                column: name.to_string(),
                expected: self.rows.len(),
                actual: values.len(),
            });
        }

        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Copy of the rows in `start..end` (clamped to the table length)
    pub fn slice(&self, start: usize, end: usize) -> Table {
        let end = end.min(self.rows.len());
        let start = start.min(end);
        Table {
            columns: self.columns.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    /// A column is numeric when every non-null value is a number
    pub fn is_numeric_column(&self, name: &str) -> bool {
        match self.column_index(name) {
            Some(idx) => {
                let mut seen_number = false;
                for row in &self.rows {
                    match &row[idx] {
                        Value::Null => {}
                        Value::Number(_) => seen_number = true,
                        _ => return false,
                    }
                }
                seen_number
            }
            None => false,
        }
    }

    /// The first `n` rows as JSON records (column name -> value)
    pub fn head(&self, n: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(n)
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}
