//! In-memory relational snapshot addressable by table id, with an async
//! fetch seam for rows that live only in the underlying store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::action::DocAction;
use crate::errors::DocError;
use crate::table_data::TableDataAction;
use crate::value::{CellValue, RowId};

/// A query against the underlying document store: a table and per-column
/// value filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table_id: String,
    pub filters: BTreeMap<String, Vec<CellValue>>,
}

impl Query {
    pub fn whole_table(table_id: impl Into<String>) -> Self {
        Self { table_id: table_id.into(), filters: BTreeMap::new() }
    }

    pub fn by_row_ids(table_id: impl Into<String>, row_ids: &[RowId]) -> Self {
        let mut filters = BTreeMap::new();
        filters.insert(
            "id".to_string(),
            row_ids.iter().map(|id| Value::from(*id)).collect(),
        );
        Self { table_id: table_id.into(), filters }
    }
}

/// The document store backing a snapshot. Implemented by the host; queried
/// when a snapshot needs rows it does not hold.
#[async_trait]
pub trait DocStorage: Send + Sync {
    async fn fetch_query(&self, query: &Query) -> Result<TableDataAction, DocError>;
}

/// An in-memory relational view over a set of tables.
#[derive(Debug, Clone, Default)]
pub struct DocData {
    tables: HashMap<String, TableDataAction>,
}

impl DocData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables<I: IntoIterator<Item = TableDataAction>>(tables: I) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|t| (t.table_id.clone(), t))
                .collect(),
        }
    }

    pub fn get_table(&self, table_id: &str) -> Option<&TableDataAction> {
        self.tables.get(table_id)
    }

    pub fn get_table_mut(&mut self, table_id: &str) -> Option<&mut TableDataAction> {
        self.tables.get_mut(table_id)
    }

    pub fn has_table(&self, table_id: &str) -> bool {
        self.tables.contains_key(table_id)
    }

    pub fn table_ids(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Replace a table wholesale with a fetched snapshot.
    pub fn sync_table(&mut self, data: TableDataAction) {
        self.tables.insert(data.table_id.clone(), data);
    }

    /// Fetch the given rows from the store and install them as the table's
    /// snapshot.
    pub async fn sync_from(
        &mut self,
        storage: &dyn DocStorage,
        table_id: &str,
        row_ids: &[RowId],
    ) -> Result<(), DocError> {
        let query = Query::by_row_ids(table_id, row_ids);
        let data = storage.fetch_query(&query).await?;
        debug!(table_id, rows = data.len(), "synced table rows from storage");
        self.sync_table(data);
        Ok(())
    }

    fn table_mut(&mut self, table_id: &str) -> Result<&mut TableDataAction, DocError> {
        self.tables
            .get_mut(table_id)
            .ok_or_else(|| DocError::TableNotFound(table_id.to_string()))
    }

    /// Apply one committed action to the snapshot.
    pub fn receive_action(&mut self, action: &DocAction) -> Result<(), DocError> {
        match action {
            DocAction::AddRecord { table_id, row_id, columns } => {
                self.table_mut(table_id)?.append_row(*row_id, columns);
            }
            DocAction::BulkAddRecord { table_id, row_ids, columns } => {
                let table = self.table_mut(table_id)?;
                for (i, row_id) in row_ids.iter().enumerate() {
                    let cells: BTreeMap<String, CellValue> = columns
                        .iter()
                        .map(|(col, values)| {
                            (col.clone(), values.get(i).cloned().unwrap_or(Value::Null))
                        })
                        .collect();
                    table.append_row(*row_id, &cells);
                }
            }
            DocAction::UpdateRecord { table_id, row_id, columns } => {
                let table = self.table_mut(table_id)?;
                Self::update_row(table, *row_id, columns)?;
            }
            DocAction::BulkUpdateRecord { table_id, row_ids, columns } => {
                let table = self.table_mut(table_id)?;
                for (i, row_id) in row_ids.iter().enumerate() {
                    let cells: BTreeMap<String, CellValue> = columns
                        .iter()
                        .map(|(col, values)| {
                            (col.clone(), values.get(i).cloned().unwrap_or(Value::Null))
                        })
                        .collect();
                    Self::update_row(table, *row_id, &cells)?;
                }
            }
            DocAction::RemoveRecord { table_id, row_id } => {
                self.table_mut(table_id)?.remove_row(*row_id)?;
            }
            DocAction::BulkRemoveRecord { table_id, row_ids } => {
                let table = self.table_mut(table_id)?;
                for row_id in row_ids {
                    table.remove_row(*row_id)?;
                }
            }
            DocAction::ReplaceTableData { table_id, row_ids, columns }
            | DocAction::TableData { table_id, row_ids, columns } => {
                self.sync_table(TableDataAction {
                    table_id: table_id.clone(),
                    row_ids: row_ids.clone(),
                    columns: columns.clone(),
                });
            }
            DocAction::AddTable { table_id, columns } => {
                let mut table = TableDataAction::new(table_id.clone());
                for info in columns {
                    if let Some(col_id) = info.get("id").and_then(Value::as_str) {
                        table.columns.insert(col_id.to_string(), Vec::new());
                    }
                }
                self.tables.insert(table_id.clone(), table);
            }
            DocAction::RemoveTable { table_id } => {
                self.tables
                    .remove(table_id)
                    .ok_or_else(|| DocError::TableNotFound(table_id.clone()))?;
            }
            DocAction::RenameTable { table_id, new_table_id } => {
                let mut table = self
                    .tables
                    .remove(table_id)
                    .ok_or_else(|| DocError::TableNotFound(table_id.clone()))?;
                table.table_id = new_table_id.clone();
                self.tables.insert(new_table_id.clone(), table);
            }
            DocAction::AddColumn { table_id, col_id, .. } => {
                let table = self.table_mut(table_id)?;
                let len = table.len();
                table.columns.insert(col_id.clone(), vec![Value::Null; len]);
            }
            DocAction::RemoveColumn { table_id, col_id } => {
                let table = self.table_mut(table_id)?;
                table
                    .columns
                    .remove(col_id)
                    .ok_or_else(|| DocError::ColumnNotFound(table_id.clone(), col_id.clone()))?;
            }
            DocAction::RenameColumn { table_id, col_id, new_col_id } => {
                let table = self.table_mut(table_id)?;
                let values = table
                    .columns
                    .remove(col_id)
                    .ok_or_else(|| DocError::ColumnNotFound(table_id.clone(), col_id.clone()))?;
                table.columns.insert(new_col_id.clone(), values);
            }
            DocAction::ModifyColumn { .. } => {
                // Column metadata changes carry no cell payload.
            }
        }
        Ok(())
    }

    fn update_row(
        table: &mut TableDataAction,
        row_id: RowId,
        cells: &BTreeMap<String, CellValue>,
    ) -> Result<(), DocError> {
        let index = table
            .index_of(row_id)
            .ok_or_else(|| DocError::RowNotFound(table.table_id.clone(), row_id))?;
        for (col_id, value) in cells {
            if !table.columns.contains_key(col_id) {
                let len = table.len();
                table.columns.insert(col_id.clone(), vec![Value::Null; len]);
            }
            table.set_cell(col_id, index, value.clone())?;
        }
        Ok(())
    }
}
