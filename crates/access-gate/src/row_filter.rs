//! Differential row visibility: rewrites one action into up to three so a
//! viewer sees exactly the rows they may read, before and after the step.

use std::collections::HashSet;
use std::sync::Arc;

use doc_model::{censored, DocAction, RecordView, RowId, TableDataAction};
use rule_center::{PermValue, PermissionInfo};
use tracing::debug;

use crate::errors::GateError;
use crate::steps::ActionStep;

/// Rewrite `action` for one viewer using the step's snapshots. The result is
/// an ordered list: synthetic add of newly-visible rows, the trimmed
/// original, synthetic removal of newly-hidden rows.
pub fn filter_row_level(
    action: &DocAction,
    step: &ActionStep,
    perm_info: &PermissionInfo,
) -> Result<Vec<DocAction>, GateError> {
    let table_id = action.table_id().to_string();
    let touched = match action.row_ids() {
        Some(ids) => ids,
        None => return Ok(vec![action.clone()]),
    };

    let rows_before = step.rows_before.as_ref();
    let rows_after = step.rows_after.as_ref();
    let row_forbidden = |rows: Option<&Arc<TableDataAction>>, row_id: RowId| -> bool {
        match rows.and_then(|rows| RecordView::for_row(rows.clone(), row_id)) {
            Some(rec) => {
                perm_info
                    .get_table_access_for_record(&table_id, Some(&rec), None)
                    .perms
                    .read
                    == PermValue::Deny
            }
            // A row absent from the snapshot is not visible there.
            None => true,
        }
    };

    let mut hidden_both: HashSet<RowId> = HashSet::new();
    let mut appearing: Vec<RowId> = Vec::new();
    let mut disappearing: Vec<RowId> = Vec::new();
    for row_id in &touched {
        let before = row_forbidden(rows_before, *row_id);
        let after = row_forbidden(rows_after, *row_id);
        match (before, after) {
            (true, true) => {
                hidden_both.insert(*row_id);
            }
            (false, false) => {}
            (true, false) => appearing.push(*row_id),
            (false, true) => disappearing.push(*row_id),
        }
    }

    let mut out: Vec<DocAction> = Vec::new();

    // Newly-visible rows: adds already carry the row; anything else emits a
    // synthetic add built from the post-state snapshot.
    let mut strip: HashSet<RowId> = hidden_both.clone();
    if !appearing.is_empty() && !action.is_add() {
        let rows_after = rows_after.ok_or_else(|| {
            GateError::Internal("row became visible without a post-state snapshot".into())
        })?;
        let data = rows_after.take_rows(&appearing);
        if data.row_ids.len() != appearing.len() {
            return Err(GateError::Internal(
                "unexpected row removal while exposing rows".into(),
            ));
        }
        out.push(DocAction::BulkAddRecord {
            table_id: table_id.clone(),
            row_ids: data.row_ids,
            columns: data.columns,
        });
        strip.extend(appearing.iter().copied());
    }

    // Newly-hidden rows: removals already hide the row; anything else strips
    // it now and removes it explicitly afterwards.
    let force_remove = !disappearing.is_empty() && !action.is_removal();
    if force_remove {
        strip.extend(disappearing.iter().copied());
    }

    if let Some(pruned) = strip_rows(action, &strip) {
        out.push(pruned);
    } else {
        debug!(%table_id, "action fully hidden from viewer");
    }

    if force_remove {
        out.push(DocAction::BulkRemoveRecord {
            table_id: table_id.clone(),
            row_ids: disappearing,
        });
    }

    for action in &mut out {
        censor_cells(action, step, perm_info);
    }
    Ok(out)
}

/// Remove the given rows from the action, keeping row ids and every column's
/// values in lockstep; a singleton action whose sole row is removed yields
/// `None`.
fn strip_rows(action: &DocAction, strip: &HashSet<RowId>) -> Option<DocAction> {
    if strip.is_empty() {
        return Some(action.clone());
    }
    fn keep_bulk(
        row_ids: &[RowId],
        columns: &doc_model::BulkColValues,
        strip: &HashSet<RowId>,
    ) -> (Vec<RowId>, doc_model::BulkColValues) {
        let kept: Vec<usize> = (0..row_ids.len())
            .filter(|i| !strip.contains(&row_ids[*i]))
            .collect();
        let ids = kept.iter().map(|i| row_ids[*i]).collect();
        let columns = columns
            .iter()
            .map(|(col, values)| {
                (
                    col.clone(),
                    kept.iter()
                        .map(|i| values.get(*i).cloned().unwrap_or(serde_json::Value::Null))
                        .collect(),
                )
            })
            .collect();
        (ids, columns)
    }

    match action {
        DocAction::AddRecord { row_id, .. }
        | DocAction::UpdateRecord { row_id, .. }
        | DocAction::RemoveRecord { row_id, .. } => {
            if strip.contains(row_id) {
                None
            } else {
                Some(action.clone())
            }
        }
        DocAction::BulkAddRecord { table_id, row_ids, columns } => {
            let (ids, columns) = keep_bulk(row_ids, columns, strip);
            (!ids.is_empty()).then(|| DocAction::BulkAddRecord {
                table_id: table_id.clone(),
                row_ids: ids,
                columns,
            })
        }
        DocAction::BulkUpdateRecord { table_id, row_ids, columns } => {
            let (ids, columns) = keep_bulk(row_ids, columns, strip);
            (!ids.is_empty()).then(|| DocAction::BulkUpdateRecord {
                table_id: table_id.clone(),
                row_ids: ids,
                columns,
            })
        }
        DocAction::BulkRemoveRecord { table_id, row_ids } => {
            let ids: Vec<RowId> = row_ids
                .iter()
                .copied()
                .filter(|id| !strip.contains(id))
                .collect();
            (!ids.is_empty()).then(|| DocAction::BulkRemoveRecord {
                table_id: table_id.clone(),
                row_ids: ids,
            })
        }
        DocAction::ReplaceTableData { table_id, row_ids, columns }
        | DocAction::TableData { table_id, row_ids, columns } => {
            let (ids, columns) = keep_bulk(row_ids, columns, strip);
            let rebuilt = TableDataAction {
                table_id: table_id.clone(),
                row_ids: ids,
                columns,
            };
            Some(match action {
                DocAction::ReplaceTableData { .. } => DocAction::ReplaceTableData {
                    table_id: rebuilt.table_id,
                    row_ids: rebuilt.row_ids,
                    columns: rebuilt.columns,
                },
                _ => rebuilt.to_doc_action(),
            })
        }
        other => Some(other.clone()),
    }
}

/// Overwrite cells the viewer may not read with the censor sentinel,
/// evaluating column rules against the post-state row.
fn censor_cells(action: &mut DocAction, step: &ActionStep, perm_info: &PermissionInfo) {
    let table_id = action.table_id().to_string();
    let row_ids = match action.row_ids() {
        Some(ids) => ids,
        None => return,
    };
    let source = step.rows_after.as_ref().or(step.rows_before.as_ref());
    let source = match source {
        Some(rows) => rows.clone(),
        None => return,
    };

    let mut denied_cells: Vec<(String, usize)> = Vec::new();
    {
        let col_ids: Vec<String> = action.col_ids().iter().map(|s| s.to_string()).collect();
        for (index, row_id) in row_ids.iter().enumerate() {
            let rec = match RecordView::for_row(source.clone(), *row_id) {
                Some(rec) => rec,
                None => continue,
            };
            for col_id in &col_ids {
                if col_id == doc_model::meta::MANUAL_SORT {
                    continue;
                }
                let access =
                    perm_info.get_column_access_for_record(&table_id, col_id, Some(&rec), None);
                if access.perms.read == PermValue::Deny {
                    denied_cells.push((col_id.clone(), index));
                }
            }
        }
    }
    if denied_cells.is_empty() {
        return;
    }
    match action {
        DocAction::AddRecord { columns, .. } | DocAction::UpdateRecord { columns, .. } => {
            for (col_id, _) in denied_cells {
                if let Some(cell) = columns.get_mut(&col_id) {
                    *cell = censored();
                }
            }
        }
        DocAction::BulkAddRecord { columns, .. }
        | DocAction::BulkUpdateRecord { columns, .. }
        | DocAction::ReplaceTableData { columns, .. }
        | DocAction::TableData { columns, .. } => {
            for (col_id, index) in denied_cells {
                if let Some(values) = columns.get_mut(&col_id) {
                    if let Some(cell) = values.get_mut(index) {
                        *cell = censored();
                    }
                }
            }
        }
        _ => {}
    }
}
