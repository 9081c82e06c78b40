//! Tabular results handed back to callers.

use crate::types::{FieldType, Value};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub field_type: FieldType,
}

impl Column {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// One row of a table.
///
/// `error` is a whole-row failure. `column_errors` holds per-column failures.
/// Both can be set while other columns still carry decoded values.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Row {
    pub values: Vec<Option<Value>>,
    pub column_errors: Vec<Option<String>>,
    pub error: Option<String>,
}

impl Row {
    pub(crate) fn empty(width: usize) -> Self {
        Self {
            values: vec![None; width],
            column_errors: vec![None; width],
            error: None,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.error.is_some() || self.column_errors.iter().any(Option::is_some)
    }
}

/// All rows for one entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Table {
    entity: String,
    columns: Arc<[Column]>,
    rows: Vec<Row>,
}

impl Table {
    pub(crate) fn new(entity: String, columns: Arc<[Column]>) -> Self {
        Self {
            entity,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.values.get(index)?.as_ref()
    }

    pub fn column_error(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.column_errors.get(index)?.as_deref()
    }

    pub(crate) fn extend(&mut self, rows: Vec<Row>) {
        self.rows.extend(rows);
    }
}

/// One table per requested entity, in request order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TabularResult {
    tables: Vec<Table>,
}

impl TabularResult {
    pub(crate) fn new(entities: &[String], columns: &Arc<[Column]>) -> Self {
        Self {
            tables: entities
                .iter()
                .map(|entity| Table::new(entity.clone(), Arc::clone(columns)))
                .collect(),
        }
    }

    pub fn get(&self, entity: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.entity == entity)
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub(crate) fn table_mut(&mut self, index: usize) -> Option<&mut Table> {
        self.tables.get_mut(index)
    }
}
