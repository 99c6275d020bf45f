//! Structural-metadata censorship: blanking sensitive fields of layout rows
//! instead of removing them, so client-side references stay intact.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use doc_model::meta::{
    is_acl_table, COLUMNS_TABLE, FIELDS_TABLE, MANUAL_SORT, SECTIONS_TABLE, TABLES_TABLE,
    VIEWS_TABLE,
};
use doc_model::{CellValue, DocAction, DocError, RecordEditor, RecordView, RowId, TableDataAction};
use rule_center::collection::SPECIAL_ACCESS_RULES;
use rule_center::{PermValue, PermissionInfo, TableReadDisposition};
use serde_json::json;

/// What censoring did to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CensorOutcome {
    Unchanged,
    Censored,
    /// The action must not be delivered at all.
    Suppress,
}

/// The sets of forbidden layout entities for one viewer at one point of a
/// bundle. Entities reference each other by integer row id, so the sets are
/// plain id sets resolved through lookup maps.
pub struct CensorshipInfo {
    censored_table_rows: HashSet<RowId>,
    uncensored_table_ids: HashSet<String>,
    censored_columns: HashSet<RowId>,
    censored_sections: HashSet<RowId>,
    censored_views: HashSet<RowId>,
    censored_fields: HashSet<RowId>,
    can_view_acl: bool,
}

impl CensorshipInfo {
    pub fn new(
        meta: &HashMap<String, Arc<TableDataAction>>,
        perm_info: &PermissionInfo,
    ) -> CensorshipInfo {
        let mut censored_table_rows = HashSet::new();
        let mut uncensored_table_ids = HashSet::new();
        let mut table_id_by_row: HashMap<RowId, String> = HashMap::new();
        if let Some(tables) = meta.get(TABLES_TABLE) {
            for index in 0..tables.len() {
                let row = RecordView::new(tables.clone(), index);
                let table_id = row.get("tableId").as_str().unwrap_or_default().to_string();
                table_id_by_row.insert(row.row_id(), table_id.clone());
                match perm_info.table_read_disposition(&table_id) {
                    TableReadDisposition::Deny => {
                        censored_table_rows.insert(row.row_id());
                    }
                    TableReadDisposition::Allow => {
                        uncensored_table_ids.insert(table_id);
                    }
                    _ => {}
                }
            }
        }

        let mut censored_columns = HashSet::new();
        if let Some(columns) = meta.get(COLUMNS_TABLE) {
            for index in 0..columns.len() {
                let row = RecordView::new(columns.clone(), index);
                let col_id = row.get("colId").as_str().unwrap_or_default().to_string();
                if col_id == MANUAL_SORT {
                    continue;
                }
                let parent = row.get("parentId").as_i64().unwrap_or(0);
                if censored_table_rows.contains(&parent) {
                    censored_columns.insert(row.row_id());
                    continue;
                }
                if let Some(table_id) = table_id_by_row.get(&parent) {
                    let access = perm_info.get_column_access(table_id, &col_id);
                    if access.perms.read == PermValue::Deny {
                        censored_columns.insert(row.row_id());
                    }
                }
            }
        }

        let mut censored_sections = HashSet::new();
        let mut censored_views = HashSet::new();
        if let Some(sections) = meta.get(SECTIONS_TABLE) {
            for index in 0..sections.len() {
                let row = RecordView::new(sections.clone(), index);
                let table_ref = row.get("tableRef").as_i64().unwrap_or(0);
                if censored_table_rows.contains(&table_ref) {
                    censored_sections.insert(row.row_id());
                    censored_views.insert(row.get("parentId").as_i64().unwrap_or(0));
                }
            }
        }

        let mut censored_fields = HashSet::new();
        if let Some(fields) = meta.get(FIELDS_TABLE) {
            for index in 0..fields.len() {
                let row = RecordView::new(fields.clone(), index);
                let parent = row.get("parentId").as_i64().unwrap_or(0);
                let col_ref = row.get("colRef").as_i64().unwrap_or(0);
                if censored_sections.contains(&parent) || censored_columns.contains(&col_ref) {
                    censored_fields.insert(row.row_id());
                }
            }
        }

        CensorshipInfo {
            censored_table_rows,
            uncensored_table_ids,
            censored_columns,
            censored_sections,
            censored_views,
            censored_fields,
            can_view_acl: perm_info.get_special_access(SPECIAL_ACCESS_RULES) == PermValue::Allow,
        }
    }

    /// Tables whose read permission is an explicit allow, unshadowed by
    /// column rules.
    pub fn uncensored_tables(&self) -> &HashSet<String> {
        &self.uncensored_table_ids
    }

    fn censored_set(&self, table_id: &str) -> Option<&HashSet<RowId>> {
        match table_id {
            TABLES_TABLE => Some(&self.censored_table_rows),
            VIEWS_TABLE => Some(&self.censored_views),
            SECTIONS_TABLE => Some(&self.censored_sections),
            COLUMNS_TABLE => Some(&self.censored_columns),
            FIELDS_TABLE => Some(&self.censored_fields),
            _ => None,
        }
    }

    /// Rewrite one structural-table action in place.
    pub fn apply_to_action(&self, action: &mut DocAction) -> CensorOutcome {
        let table_id = action.table_id().to_string();
        if is_acl_table(&table_id) {
            if self.can_view_acl {
                return CensorOutcome::Unchanged;
            }
            return match action {
                DocAction::TableData { row_ids, columns, .. }
                | DocAction::ReplaceTableData { row_ids, columns, .. } => {
                    row_ids.clear();
                    for values in columns.values_mut() {
                        values.clear();
                    }
                    CensorOutcome::Censored
                }
                _ => CensorOutcome::Suppress,
            };
        }
        let (set, blanks) = match (self.censored_set(&table_id), blank_values(&table_id)) {
            (Some(set), Some(blanks)) => (set, blanks),
            _ => return CensorOutcome::Unchanged,
        };
        let row_ids = match action.row_ids() {
            Some(ids) => ids,
            None => return CensorOutcome::Unchanged,
        };
        let mut changed = false;
        for (index, row_id) in row_ids.iter().enumerate() {
            if !set.contains(row_id) {
                continue;
            }
            changed = true;
            blank_action_row(action, index, &blanks);
        }
        if changed { CensorOutcome::Censored } else { CensorOutcome::Unchanged }
    }

    /// Rewrite a whole-table payload in place. Returns whether anything was
    /// blanked or suppressed.
    pub fn apply_to_table_data(&self, data: &mut TableDataAction) -> Result<bool, DocError> {
        if is_acl_table(&data.table_id) {
            if self.can_view_acl {
                return Ok(false);
            }
            data.clear();
            return Ok(true);
        }
        let (set, blanks) = match (self.censored_set(&data.table_id), blank_values(&data.table_id))
        {
            (Some(set), Some(blanks)) => (set, blanks),
            _ => return Ok(false),
        };
        // Blanking only overwrites fields the payload carries.
        let blanks: Vec<(&'static str, CellValue)> = blanks
            .into_iter()
            .filter(|(col_id, _)| data.columns.contains_key(*col_id))
            .collect();
        let censored: Vec<RowId> = data
            .row_ids
            .iter()
            .copied()
            .filter(|row_id| set.contains(row_id))
            .collect();
        for row_id in &censored {
            let mut editor = RecordEditor::new(data, *row_id)?;
            for (col_id, value) in &blanks {
                editor.set(col_id, value.clone())?;
            }
        }
        Ok(!censored.is_empty())
    }
}

/// The exact fields blanked per structural table.
fn blank_values(table_id: &str) -> Option<Vec<(&'static str, CellValue)>> {
    match table_id {
        TABLES_TABLE => Some(vec![("tableId", json!(""))]),
        VIEWS_TABLE => Some(vec![("name", json!(""))]),
        SECTIONS_TABLE => Some(vec![("title", json!("")), ("tableRef", json!(0))]),
        COLUMNS_TABLE => Some(vec![
            ("label", json!("")),
            ("colId", json!("")),
            ("widgetOptions", json!("")),
            ("formula", json!("")),
            ("type", json!("Any")),
            ("parentId", json!(0)),
        ]),
        FIELDS_TABLE => Some(vec![
            ("widgetOptions", json!("")),
            ("filter", json!("")),
            ("parentId", json!(0)),
        ]),
        _ => None,
    }
}

fn blank_action_row(action: &mut DocAction, index: usize, blanks: &[(&'static str, CellValue)]) {
    match action {
        DocAction::AddRecord { columns, .. } | DocAction::UpdateRecord { columns, .. } => {
            for (col_id, value) in blanks {
                if let Some(cell) = columns.get_mut(*col_id) {
                    *cell = value.clone();
                }
            }
        }
        DocAction::BulkAddRecord { columns, .. }
        | DocAction::BulkUpdateRecord { columns, .. }
        | DocAction::ReplaceTableData { columns, .. }
        | DocAction::TableData { columns, .. } => {
            for (col_id, value) in blanks {
                if let Some(values) = columns.get_mut(*col_id) {
                    if let Some(cell) = values.get_mut(index) {
                        *cell = value.clone();
                    }
                }
            }
        }
        _ => {}
    }
}
