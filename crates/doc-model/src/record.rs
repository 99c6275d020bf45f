//! Row-shaped views over a columnar table snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::DocError;
use crate::table_data::TableDataAction;
use crate::value::{CellValue, RowId};

/// Read-only view of one row. An index of `None` is the empty view: every
/// lookup yields null.
#[derive(Debug, Clone)]
pub struct RecordView {
    data: Arc<TableDataAction>,
    index: Option<usize>,
}

impl RecordView {
    pub fn new(data: Arc<TableDataAction>, index: usize) -> Self {
        Self { data, index: Some(index) }
    }

    pub fn for_row(data: Arc<TableDataAction>, row_id: RowId) -> Option<Self> {
        let index = data.index_of(row_id)?;
        Some(Self::new(data, index))
    }

    pub fn empty(data: Arc<TableDataAction>) -> Self {
        Self { data, index: None }
    }

    pub fn table_id(&self) -> &str {
        &self.data.table_id
    }

    pub fn row_id(&self) -> RowId {
        self.index
            .and_then(|i| self.data.row_ids.get(i).copied())
            .unwrap_or(0)
    }

    pub fn has(&self, col_id: &str) -> bool {
        col_id == "id" || self.data.columns.contains_key(col_id)
    }

    pub fn get(&self, col_id: &str) -> CellValue {
        if col_id == "id" {
            return Value::from(self.row_id());
        }
        match self.index {
            Some(index) => self.data.cell(col_id, index).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        }
    }

    /// Ordered object form, used for stable comparisons.
    pub fn to_json(&self) -> Value {
        let mut fields: BTreeMap<String, CellValue> = BTreeMap::new();
        fields.insert("id".into(), Value::from(self.row_id()));
        for col_id in self.data.columns.keys() {
            fields.insert(col_id.clone(), self.get(col_id));
        }
        Value::Object(fields.into_iter().collect())
    }
}

/// Editable view of one row inside a mutable snapshot.
pub struct RecordEditor<'a> {
    data: &'a mut TableDataAction,
    index: usize,
}

impl<'a> RecordEditor<'a> {
    pub fn new(data: &'a mut TableDataAction, row_id: RowId) -> Result<Self, DocError> {
        let index = data
            .index_of(row_id)
            .ok_or_else(|| DocError::RowNotFound(data.table_id.clone(), row_id))?;
        Ok(Self { data, index })
    }

    pub fn get(&self, col_id: &str) -> CellValue {
        self.data.cell(col_id, self.index).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, col_id: &str, value: CellValue) -> Result<(), DocError> {
        self.data.set_cell(col_id, self.index, value)
    }
}
