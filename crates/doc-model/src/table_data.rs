//! Columnar table snapshots: row `i` has id `row_ids[i]` and cell
//! `columns[col_id][i]`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{BulkColValues, DocAction};
use crate::errors::DocError;
use crate::value::{CellValue, RowId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDataAction {
    pub table_id: String,
    pub row_ids: Vec<RowId>,
    pub columns: BulkColValues,
}

impl TableDataAction {
    pub fn new(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            row_ids: Vec::new(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with_columns<I: IntoIterator<Item = (String, Vec<CellValue>)>>(
        table_id: impl Into<String>,
        row_ids: Vec<RowId>,
        columns: I,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            row_ids,
            columns: columns.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    pub fn index_of(&self, row_id: RowId) -> Option<usize> {
        self.row_ids.iter().position(|id| *id == row_id)
    }

    pub fn cell(&self, col_id: &str, index: usize) -> Option<&CellValue> {
        self.columns.get(col_id).and_then(|values| values.get(index))
    }

    pub fn set_cell(
        &mut self,
        col_id: &str,
        index: usize,
        value: CellValue,
    ) -> Result<(), DocError> {
        let values = self
            .columns
            .get_mut(col_id)
            .ok_or_else(|| DocError::ColumnNotFound(self.table_id.clone(), col_id.into()))?;
        let slot = values.get_mut(index).ok_or_else(|| {
            DocError::RowNotFound(self.table_id.clone(), self.row_ids.get(index).copied().unwrap_or(0))
        })?;
        *slot = value;
        Ok(())
    }

    /// Append one row, filling columns absent from `cells` with null.
    pub fn append_row(&mut self, row_id: RowId, cells: &BTreeMap<String, CellValue>) {
        for col_id in cells.keys() {
            self.columns
                .entry(col_id.clone())
                .or_insert_with(|| vec![Value::Null; self.row_ids.len()]);
        }
        self.row_ids.push(row_id);
        for (col_id, values) in self.columns.iter_mut() {
            values.push(cells.get(col_id).cloned().unwrap_or(Value::Null));
        }
    }

    pub fn remove_row(&mut self, row_id: RowId) -> Result<(), DocError> {
        let index = self
            .index_of(row_id)
            .ok_or_else(|| DocError::RowNotFound(self.table_id.clone(), row_id))?;
        self.row_ids.remove(index);
        for values in self.columns.values_mut() {
            if index < values.len() {
                values.remove(index);
            }
        }
        Ok(())
    }

    /// Keep only the rows whose ids are in `keep`, removing row ids and every
    /// column's values in lockstep.
    pub fn retain_rows(&mut self, keep: &HashSet<RowId>) {
        let kept: Vec<usize> = (0..self.row_ids.len())
            .filter(|i| keep.contains(&self.row_ids[*i]))
            .collect();
        self.row_ids = kept.iter().map(|i| self.row_ids[*i]).collect();
        for values in self.columns.values_mut() {
            *values = kept
                .iter()
                .map(|i| values.get(*i).cloned().unwrap_or(Value::Null))
                .collect();
        }
    }

    /// Subset snapshot carrying only `row_ids`, in the order given.
    pub fn take_rows(&self, row_ids: &[RowId]) -> TableDataAction {
        let indices: Vec<Option<usize>> = row_ids.iter().map(|id| self.index_of(*id)).collect();
        let mut out = TableDataAction::new(self.table_id.clone());
        out.row_ids = row_ids
            .iter()
            .zip(&indices)
            .filter(|(_, idx)| idx.is_some())
            .map(|(id, _)| *id)
            .collect();
        for (col_id, values) in &self.columns {
            let column: Vec<CellValue> = indices
                .iter()
                .filter_map(|idx| idx.map(|i| values.get(i).cloned().unwrap_or(Value::Null)))
                .collect();
            out.columns.insert(col_id.clone(), column);
        }
        out
    }

    pub fn to_doc_action(&self) -> DocAction {
        DocAction::TableData {
            table_id: self.table_id.clone(),
            row_ids: self.row_ids.clone(),
            columns: self.columns.clone(),
        }
    }

    pub fn from_doc_action(action: &DocAction) -> Option<TableDataAction> {
        match action {
            DocAction::TableData { table_id, row_ids, columns }
            | DocAction::ReplaceTableData { table_id, row_ids, columns } => Some(TableDataAction {
                table_id: table_id.clone(),
                row_ids: row_ids.clone(),
                columns: columns.clone(),
            }),
            _ => None,
        }
    }

    /// Drop all rows and all column payloads, keeping the table id. Used when
    /// a payload must be suppressed rather than filtered.
    pub fn clear(&mut self) {
        self.row_ids.clear();
        for values in self.columns.values_mut() {
            values.clear();
        }
    }
}
