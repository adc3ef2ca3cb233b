//! Uniform result shapes
//!
//! Every driver maps its native result set into these types, so callers never
//! see vendor row types.

use crate::query::history::ExecutionStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Column metadata of a result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    /// Vendor type name as reported by the driver
    pub type_name: String,
    pub nullable: bool,
}

impl ResultColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// One row, keyed by column name in order of appearance
pub type ResultRow = Map<String, Value>;

/// Ordered columns paired with ordered rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<ResultRow>,
}

impl TabularResult {
    pub fn new(columns: Vec<ResultColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row from positional values
    ///
    /// Values beyond the column count are dropped; missing trailing values are
    /// filled with null.
    pub fn push_values(&mut self, values: Vec<Value>) {
        let mut values = values.into_iter();
        let mut row = Map::with_capacity(self.columns.len());
        for column in &self.columns {
            row.insert(column.name.clone(), values.next().unwrap_or(Value::Null));
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What a single statement produced
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutcome {
    /// The statement yielded a result set, already capped to the row limit
    Rows(TabularResult),
    /// The statement yielded an affected-row count
    Affected(u64),
}

/// Response of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Present on success; empty for statements without a result set
    pub columns: Option<Vec<ResultColumn>>,
    pub rows: Option<Vec<ResultRow>>,
    pub rows_returned: u64,
    pub elapsed_ms: u64,
    pub error_message: Option<String>,
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Outcome of a connection probe; failures are values, not errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub success: bool,
    pub message: String,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_preserves_column_order() {
        let mut result = TabularResult::new(vec![
            ResultColumn::new("zeta", "int4", false),
            ResultColumn::new("alpha", "text", true),
        ]);
        result.push_values(vec![json!(1), json!("a")]);

        let keys: Vec<_> = result.rows[0].keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_short_row_is_padded_with_null() {
        let mut result = TabularResult::new(vec![
            ResultColumn::new("a", "int4", false),
            ResultColumn::new("b", "int4", true),
        ]);
        result.push_values(vec![json!(7)]);
        assert_eq!(result.rows[0]["b"], Value::Null);
        assert_eq!(result.len(), 1);
    }
}
