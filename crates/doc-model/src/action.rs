//! Document actions: the tagged variants the data engine emits, plus the
//! positional JSON-array wire codec the client protocol uses.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::DocError;
use crate::value::{CellValue, RowId};

/// Column map for a single-row action: `colId -> value`.
pub type ColValues = BTreeMap<String, CellValue>;

/// Column map for a bulk action: `colId -> values[]`, one entry per row.
pub type BulkColValues = BTreeMap<String, Vec<CellValue>>;

/// Column metadata payload carried by schema actions.
pub type ColInfo = BTreeMap<String, CellValue>;

/// One committed change to the document, row-shaped or schema-shaped.
#[derive(Debug, Clone, PartialEq)]
pub enum DocAction {
    AddRecord {
        table_id: String,
        row_id: RowId,
        columns: ColValues,
    },
    BulkAddRecord {
        table_id: String,
        row_ids: Vec<RowId>,
        columns: BulkColValues,
    },
    UpdateRecord {
        table_id: String,
        row_id: RowId,
        columns: ColValues,
    },
    BulkUpdateRecord {
        table_id: String,
        row_ids: Vec<RowId>,
        columns: BulkColValues,
    },
    RemoveRecord {
        table_id: String,
        row_id: RowId,
    },
    BulkRemoveRecord {
        table_id: String,
        row_ids: Vec<RowId>,
    },
    ReplaceTableData {
        table_id: String,
        row_ids: Vec<RowId>,
        columns: BulkColValues,
    },
    TableData {
        table_id: String,
        row_ids: Vec<RowId>,
        columns: BulkColValues,
    },
    AddTable {
        table_id: String,
        columns: Vec<ColInfo>,
    },
    RemoveTable {
        table_id: String,
    },
    RenameTable {
        table_id: String,
        new_table_id: String,
    },
    AddColumn {
        table_id: String,
        col_id: String,
        info: ColInfo,
    },
    RemoveColumn {
        table_id: String,
        col_id: String,
    },
    RenameColumn {
        table_id: String,
        col_id: String,
        new_col_id: String,
    },
    ModifyColumn {
        table_id: String,
        col_id: String,
        info: ColInfo,
    },
}

impl DocAction {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            DocAction::AddRecord { .. } => "AddRecord",
            DocAction::BulkAddRecord { .. } => "BulkAddRecord",
            DocAction::UpdateRecord { .. } => "UpdateRecord",
            DocAction::BulkUpdateRecord { .. } => "BulkUpdateRecord",
            DocAction::RemoveRecord { .. } => "RemoveRecord",
            DocAction::BulkRemoveRecord { .. } => "BulkRemoveRecord",
            DocAction::ReplaceTableData { .. } => "ReplaceTableData",
            DocAction::TableData { .. } => "TableData",
            DocAction::AddTable { .. } => "AddTable",
            DocAction::RemoveTable { .. } => "RemoveTable",
            DocAction::RenameTable { .. } => "RenameTable",
            DocAction::AddColumn { .. } => "AddColumn",
            DocAction::RemoveColumn { .. } => "RemoveColumn",
            DocAction::RenameColumn { .. } => "RenameColumn",
            DocAction::ModifyColumn { .. } => "ModifyColumn",
        }
    }

    /// Every action carries a table id, recoverable without interpretation.
    pub fn table_id(&self) -> &str {
        match self {
            DocAction::AddRecord { table_id, .. }
            | DocAction::BulkAddRecord { table_id, .. }
            | DocAction::UpdateRecord { table_id, .. }
            | DocAction::BulkUpdateRecord { table_id, .. }
            | DocAction::RemoveRecord { table_id, .. }
            | DocAction::BulkRemoveRecord { table_id, .. }
            | DocAction::ReplaceTableData { table_id, .. }
            | DocAction::TableData { table_id, .. }
            | DocAction::AddTable { table_id, .. }
            | DocAction::RemoveTable { table_id }
            | DocAction::RenameTable { table_id, .. }
            | DocAction::AddColumn { table_id, .. }
            | DocAction::RemoveColumn { table_id, .. }
            | DocAction::RenameColumn { table_id, .. }
            | DocAction::ModifyColumn { table_id, .. } => table_id,
        }
    }

    pub fn is_data_action(&self) -> bool {
        matches!(
            self,
            DocAction::AddRecord { .. }
                | DocAction::BulkAddRecord { .. }
                | DocAction::UpdateRecord { .. }
                | DocAction::BulkUpdateRecord { .. }
                | DocAction::RemoveRecord { .. }
                | DocAction::BulkRemoveRecord { .. }
                | DocAction::ReplaceTableData { .. }
                | DocAction::TableData { .. }
        )
    }

    pub fn is_schema_action(&self) -> bool {
        !self.is_data_action()
    }

    pub fn is_add(&self) -> bool {
        matches!(
            self,
            DocAction::AddRecord { .. }
                | DocAction::BulkAddRecord { .. }
                | DocAction::ReplaceTableData { .. }
                | DocAction::TableData { .. }
        )
    }

    pub fn is_update(&self) -> bool {
        matches!(
            self,
            DocAction::UpdateRecord { .. } | DocAction::BulkUpdateRecord { .. }
        )
    }

    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            DocAction::RemoveRecord { .. } | DocAction::BulkRemoveRecord { .. }
        )
    }

    /// Row ids touched by a data action; `None` for schema actions.
    pub fn row_ids(&self) -> Option<Vec<RowId>> {
        match self {
            DocAction::AddRecord { row_id, .. }
            | DocAction::UpdateRecord { row_id, .. }
            | DocAction::RemoveRecord { row_id, .. } => Some(vec![*row_id]),
            DocAction::BulkAddRecord { row_ids, .. }
            | DocAction::BulkUpdateRecord { row_ids, .. }
            | DocAction::BulkRemoveRecord { row_ids, .. }
            | DocAction::ReplaceTableData { row_ids, .. }
            | DocAction::TableData { row_ids, .. } => Some(row_ids.clone()),
            _ => None,
        }
    }

    /// Column ids carried by the action, for cell-carrying and column-schema
    /// shapes.
    pub fn col_ids(&self) -> Vec<&str> {
        match self {
            DocAction::AddRecord { columns, .. } | DocAction::UpdateRecord { columns, .. } => {
                columns.keys().map(String::as_str).collect()
            }
            DocAction::BulkAddRecord { columns, .. }
            | DocAction::BulkUpdateRecord { columns, .. }
            | DocAction::ReplaceTableData { columns, .. }
            | DocAction::TableData { columns, .. } => {
                columns.keys().map(String::as_str).collect()
            }
            DocAction::AddColumn { col_id, .. }
            | DocAction::RemoveColumn { col_id, .. }
            | DocAction::RenameColumn { col_id, .. }
            | DocAction::ModifyColumn { col_id, .. } => vec![col_id.as_str()],
            _ => Vec::new(),
        }
    }

    /// Wire shape: a JSON array starting with the action name.
    pub fn to_wire(&self) -> Value {
        fn cols(columns: &ColValues) -> Value {
            Value::Object(columns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        fn bulk(columns: &BulkColValues) -> Value {
            Value::Object(
                columns
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::Array(v.clone())))
                    .collect(),
            )
        }
        fn ids(row_ids: &[RowId]) -> Value {
            Value::Array(row_ids.iter().map(|id| Value::from(*id)).collect())
        }
        let parts: Vec<Value> = match self {
            DocAction::AddRecord { table_id, row_id, columns }
            | DocAction::UpdateRecord { table_id, row_id, columns } => vec![
                self.name().into(),
                table_id.as_str().into(),
                Value::from(*row_id),
                cols(columns),
            ],
            DocAction::BulkAddRecord { table_id, row_ids, columns }
            | DocAction::BulkUpdateRecord { table_id, row_ids, columns }
            | DocAction::ReplaceTableData { table_id, row_ids, columns }
            | DocAction::TableData { table_id, row_ids, columns } => vec![
                self.name().into(),
                table_id.as_str().into(),
                ids(row_ids),
                bulk(columns),
            ],
            DocAction::RemoveRecord { table_id, row_id } => vec![
                self.name().into(),
                table_id.as_str().into(),
                Value::from(*row_id),
            ],
            DocAction::BulkRemoveRecord { table_id, row_ids } => vec![
                self.name().into(),
                table_id.as_str().into(),
                ids(row_ids),
            ],
            DocAction::AddTable { table_id, columns } => vec![
                self.name().into(),
                table_id.as_str().into(),
                Value::Array(columns.iter().map(cols).collect()),
            ],
            DocAction::RemoveTable { table_id } => {
                vec![self.name().into(), table_id.as_str().into()]
            }
            DocAction::RenameTable { table_id, new_table_id } => vec![
                self.name().into(),
                table_id.as_str().into(),
                new_table_id.as_str().into(),
            ],
            DocAction::AddColumn { table_id, col_id, info }
            | DocAction::ModifyColumn { table_id, col_id, info } => vec![
                self.name().into(),
                table_id.as_str().into(),
                col_id.as_str().into(),
                cols(info),
            ],
            DocAction::RemoveColumn { table_id, col_id } => vec![
                self.name().into(),
                table_id.as_str().into(),
                col_id.as_str().into(),
            ],
            DocAction::RenameColumn { table_id, col_id, new_col_id } => vec![
                self.name().into(),
                table_id.as_str().into(),
                col_id.as_str().into(),
                new_col_id.as_str().into(),
            ],
        };
        Value::Array(parts)
    }

    /// Parse the positional wire shape back into a typed action.
    pub fn from_wire(value: &Value) -> Result<DocAction, DocError> {
        let parts = value
            .as_array()
            .ok_or_else(|| DocError::BadAction("expected an array".into()))?;
        let name = parts
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| DocError::BadAction("missing action name".into()))?;
        let arg = |i: usize| -> Result<&Value, DocError> {
            parts
                .get(i)
                .ok_or_else(|| DocError::BadAction(format!("{name}: missing argument {i}")))
        };
        let str_arg = |i: usize| -> Result<String, DocError> {
            arg(i)?
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| DocError::BadAction(format!("{name}: argument {i} not a string")))
        };
        let row_arg = |i: usize| -> Result<RowId, DocError> {
            arg(i)?
                .as_i64()
                .ok_or_else(|| DocError::BadAction(format!("{name}: argument {i} not a row id")))
        };
        let rows_arg = |i: usize| -> Result<Vec<RowId>, DocError> {
            arg(i)?
                .as_array()
                .ok_or_else(|| DocError::BadAction(format!("{name}: argument {i} not an array")))?
                .iter()
                .map(|v| {
                    v.as_i64()
                        .ok_or_else(|| DocError::BadAction(format!("{name}: bad row id")))
                })
                .collect()
        };
        let cols_arg = |i: usize| -> Result<ColValues, DocError> {
            Ok(arg(i)?
                .as_object()
                .ok_or_else(|| DocError::BadAction(format!("{name}: argument {i} not an object")))?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        };
        let bulk_arg = |i: usize| -> Result<BulkColValues, DocError> {
            arg(i)?
                .as_object()
                .ok_or_else(|| DocError::BadAction(format!("{name}: argument {i} not an object")))?
                .iter()
                .map(|(k, v)| {
                    let values = v
                        .as_array()
                        .ok_or_else(|| {
                            DocError::BadAction(format!("{name}: column {k} not an array"))
                        })?
                        .clone();
                    Ok((k.clone(), values))
                })
                .collect()
        };
        let action = match name {
            "AddRecord" => DocAction::AddRecord {
                table_id: str_arg(1)?,
                row_id: row_arg(2)?,
                columns: cols_arg(3)?,
            },
            "UpdateRecord" => DocAction::UpdateRecord {
                table_id: str_arg(1)?,
                row_id: row_arg(2)?,
                columns: cols_arg(3)?,
            },
            "BulkAddRecord" => DocAction::BulkAddRecord {
                table_id: str_arg(1)?,
                row_ids: rows_arg(2)?,
                columns: bulk_arg(3)?,
            },
            "BulkUpdateRecord" => DocAction::BulkUpdateRecord {
                table_id: str_arg(1)?,
                row_ids: rows_arg(2)?,
                columns: bulk_arg(3)?,
            },
            "ReplaceTableData" => DocAction::ReplaceTableData {
                table_id: str_arg(1)?,
                row_ids: rows_arg(2)?,
                columns: bulk_arg(3)?,
            },
            "TableData" => DocAction::TableData {
                table_id: str_arg(1)?,
                row_ids: rows_arg(2)?,
                columns: bulk_arg(3)?,
            },
            "RemoveRecord" => DocAction::RemoveRecord {
                table_id: str_arg(1)?,
                row_id: row_arg(2)?,
            },
            "BulkRemoveRecord" => DocAction::BulkRemoveRecord {
                table_id: str_arg(1)?,
                row_ids: rows_arg(2)?,
            },
            "AddTable" => DocAction::AddTable {
                table_id: str_arg(1)?,
                columns: arg(2)?
                    .as_array()
                    .ok_or_else(|| DocError::BadAction("AddTable: columns not an array".into()))?
                    .iter()
                    .map(|col| {
                        col.as_object()
                            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                            .ok_or_else(|| {
                                DocError::BadAction("AddTable: column info not an object".into())
                            })
                    })
                    .collect::<Result<Vec<ColInfo>, DocError>>()?,
            },
            "RemoveTable" => DocAction::RemoveTable { table_id: str_arg(1)? },
            "RenameTable" => DocAction::RenameTable {
                table_id: str_arg(1)?,
                new_table_id: str_arg(2)?,
            },
            "AddColumn" => DocAction::AddColumn {
                table_id: str_arg(1)?,
                col_id: str_arg(2)?,
                info: cols_arg(3)?,
            },
            "ModifyColumn" => DocAction::ModifyColumn {
                table_id: str_arg(1)?,
                col_id: str_arg(2)?,
                info: cols_arg(3)?,
            },
            "RemoveColumn" => DocAction::RemoveColumn {
                table_id: str_arg(1)?,
                col_id: str_arg(2)?,
            },
            "RenameColumn" => DocAction::RenameColumn {
                table_id: str_arg(1)?,
                col_id: str_arg(2)?,
                new_col_id: str_arg(3)?,
            },
            other => return Err(DocError::BadAction(format!("unknown action: {other}"))),
        };
        Ok(action)
    }
}
