//! Tabular dataset encoding
//!
//! Datasets travel through the conversation state as JSON text in "split"
//! orientation: `{"columns": [...], "index": [...], "data": [[...], ...]}`.
//! The orchestrator never interprets the financial values themselves; it only
//! needs column names, column slices and the last row.

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Time column of every fundamentals dataset
pub const YEAR_COLUMN: &str = "calendarYear";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Dataset {
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index: Vec<Value>,
    pub data: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, data: Vec<Vec<Value>>) -> Result<Self> {
        let dataset = Self {
            columns,
            index: Vec::new(),
            data,
        };
        dataset.check_shape()?;
        Ok(dataset)
    }

    pub fn with_index(mut self, index: Vec<Value>) -> Result<Self> {
        if !index.is_empty() && index.len() != self.data.len() {
            return Err(OrchestrationError::DatasetError(format!(
                "index has {} entries for {} rows",
                index.len(),
                self.data.len()
            )));
        }
        self.index = index;
        Ok(self)
    }

    /// Decode a dataset from its serialized form
    pub fn from_json(raw: &str) -> Result<Self> {
        let dataset: Dataset = serde_json::from_str(raw)
            .map_err(|e| OrchestrationError::DatasetError(format!("malformed dataset: {}", e)))?;
        dataset.check_shape()?;
        Ok(dataset)
    }

    /// Decode a dataset already parsed as JSON, e.g. from an HTTP body
    pub fn from_value(value: Value) -> Result<Self> {
        let dataset: Dataset = serde_json::from_value(value)
            .map_err(|e| OrchestrationError::DatasetError(format!("malformed dataset: {}", e)))?;
        dataset.check_shape()?;
        Ok(dataset)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn check_shape(&self) -> Result<()> {
        let width = self.columns.len();
        if let Some((row, cells)) = self
            .data
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != width)
        {
            return Err(OrchestrationError::DatasetError(format!(
                "row {} has {} cells, expected {}",
                row,
                cells.len(),
                width
            )));
        }
        if !self.index.is_empty() && self.index.len() != self.data.len() {
            return Err(OrchestrationError::DatasetError(format!(
                "index has {} entries for {} rows",
                self.index.len(),
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_position(name).is_some()
    }

    fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All values of one column, top to bottom; short rows read as null
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let pos = self.column_position(name)?;
        Some(
            self.data
                .iter()
                .map(|row| row.get(pos).unwrap_or(&Value::Null))
                .collect(),
        )
    }

    /// Value of a column in the last row
    pub fn last_value(&self, name: &str) -> Option<&Value> {
        let pos = self.column_position(name)?;
        self.data.last().and_then(|row| row.get(pos))
    }
}

/// Render a cell as plain text (strings unquoted)
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
