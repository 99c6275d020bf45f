//! Per-action column pruning against a viewer's column permissions.

use doc_model::meta::MANUAL_SORT;
use doc_model::DocAction;
use rule_center::{AccessCheck, AccessDenied, PermValue, PermissionInfo, Severity};
use tracing::debug;

/// Apply `check` to every column the action carries. With `Severity::Check`
/// failing columns are deleted (dropping the action when none survive); with
/// `Severity::Fatal` the first denial aborts. `manualSort` always survives.
pub fn filter_action_columns(
    action: DocAction,
    perm_info: &PermissionInfo,
    check: &AccessCheck,
) -> Result<Option<DocAction>, AccessDenied> {
    let table_id = action.table_id().to_string();
    let mut column_allowed = |col_id: &str| -> Result<bool, AccessDenied> {
        if col_id == MANUAL_SORT {
            return Ok(true);
        }
        let access = perm_info.get_column_access(&table_id, col_id);
        if check.severity == Severity::Fatal {
            check.throw_if_denied(&access)?;
        }
        Ok(check.get(&access) != PermValue::Deny)
    };

    // Column-schema ops stand or fall with their single column.
    if let DocAction::AddColumn { col_id, .. }
    | DocAction::RemoveColumn { col_id, .. }
    | DocAction::RenameColumn { col_id, .. }
    | DocAction::ModifyColumn { col_id, .. } = &action
    {
        if !column_allowed(col_id)? {
            debug!(%table_id, %col_id, "dropping column schema action");
            return Ok(None);
        }
        return Ok(Some(action));
    }

    match action {
        DocAction::AddRecord { table_id, row_id, mut columns } => {
            let keep = keep_keys(columns.keys().map(String::as_str), &mut column_allowed)?;
            columns.retain(|col, _| keep.contains(col));
            if columns.is_empty() {
                debug!(%table_id, "dropping single-row action with no visible columns");
                return Ok(None);
            }
            Ok(Some(DocAction::AddRecord { table_id, row_id, columns }))
        }
        DocAction::UpdateRecord { table_id, row_id, mut columns } => {
            let keep = keep_keys(columns.keys().map(String::as_str), &mut column_allowed)?;
            columns.retain(|col, _| keep.contains(col));
            if columns.is_empty() {
                return Ok(None);
            }
            Ok(Some(DocAction::UpdateRecord { table_id, row_id, columns }))
        }
        DocAction::BulkAddRecord { table_id, row_ids, mut columns } => {
            let keep = keep_keys(columns.keys().map(String::as_str), &mut column_allowed)?;
            columns.retain(|col, _| keep.contains(col));
            if columns.is_empty() {
                debug!(%table_id, "dropping bulk action with no visible columns");
                return Ok(None);
            }
            Ok(Some(DocAction::BulkAddRecord { table_id, row_ids, columns }))
        }
        DocAction::BulkUpdateRecord { table_id, row_ids, mut columns } => {
            let keep = keep_keys(columns.keys().map(String::as_str), &mut column_allowed)?;
            columns.retain(|col, _| keep.contains(col));
            if columns.is_empty() {
                return Ok(None);
            }
            Ok(Some(DocAction::BulkUpdateRecord { table_id, row_ids, columns }))
        }
        DocAction::ReplaceTableData { table_id, row_ids, mut columns } => {
            let keep = keep_keys(columns.keys().map(String::as_str), &mut column_allowed)?;
            columns.retain(|col, _| keep.contains(col));
            if columns.is_empty() {
                return Ok(None);
            }
            Ok(Some(DocAction::ReplaceTableData { table_id, row_ids, columns }))
        }
        DocAction::TableData { table_id, row_ids, mut columns } => {
            let keep = keep_keys(columns.keys().map(String::as_str), &mut column_allowed)?;
            columns.retain(|col, _| keep.contains(col));
            if columns.is_empty() {
                return Ok(None);
            }
            Ok(Some(DocAction::TableData { table_id, row_ids, columns }))
        }
        // Row removals and table-level schema actions carry no columns.
        other => Ok(Some(other)),
    }
}

fn keep_keys<'a>(
    cols: impl Iterator<Item = &'a str>,
    column_allowed: &mut dyn FnMut(&str) -> Result<bool, AccessDenied>,
) -> Result<std::collections::BTreeSet<String>, AccessDenied> {
    let mut keep = std::collections::BTreeSet::new();
    for col in cols {
        if column_allowed(col)? {
            keep.insert(col.to_string());
        }
    }
    Ok(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::meta::{ACL_RESOURCES_TABLE, ACL_RULES_TABLE};
    use doc_model::{DocData, TableDataAction};
    use rule_center::formula::EmptyFormulaCompiler;
    use rule_center::{AccessAxis, Role, RuleCollection, UserInfo};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn info_with_secret_denied(role: Role) -> PermissionInfo {
        let resources = TableDataAction::with_columns(
            ACL_RESOURCES_TABLE,
            vec![1],
            [
                ("tableId".to_string(), vec![json!("Tasks")]),
                ("colIds".to_string(), vec![json!("secret")]),
            ],
        );
        let rules = TableDataAction::with_columns(
            ACL_RULES_TABLE,
            vec![10],
            [
                ("resource".to_string(), vec![json!(1)]),
                ("aclFormula".to_string(), vec![json!("")]),
                ("permissionsText".to_string(), vec![json!("-R")]),
                ("rulePos".to_string(), vec![json!(1.0)]),
                ("memo".to_string(), vec![json!("secret column")]),
            ],
        );
        let doc = DocData::from_tables([resources, rules]);
        let collection = Arc::new(RuleCollection::build(&doc, &EmptyFormulaCompiler));
        PermissionInfo::new(
            collection,
            Arc::new(UserInfo::new(Some(role), 1, "u@example.com", "U")),
        )
    }

    fn bulk_add() -> DocAction {
        DocAction::BulkAddRecord {
            table_id: "Tasks".into(),
            row_ids: vec![1, 2],
            columns: BTreeMap::from([
                ("public".to_string(), vec![json!("a"), json!("b")]),
                ("secret".to_string(), vec![json!("x"), json!("y")]),
                ("manualSort".to_string(), vec![json!(1), json!(2)]),
            ]),
        }
    }

    #[test]
    fn denied_columns_are_deleted_and_manual_sort_survives() {
        let info = info_with_secret_denied(Role::Viewer);
        let check = AccessCheck::read(Severity::Check);
        let out = filter_action_columns(bulk_add(), &info, &check)
            .unwrap()
            .unwrap();
        match out {
            DocAction::BulkAddRecord { columns, .. } => {
                assert!(columns.contains_key("public"));
                assert!(columns.contains_key("manualSort"));
                assert!(!columns.contains_key("secret"));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn fatal_check_raises_with_memo() {
        let info = info_with_secret_denied(Role::Viewer);
        let check = AccessCheck::new(AccessAxis::Read, Severity::Fatal);
        let err = filter_action_columns(bulk_add(), &info, &check).unwrap_err();
        assert_eq!(err.memos, vec!["secret column".to_string()]);
    }

    #[test]
    fn failing_column_schema_action_is_dropped() {
        let info = info_with_secret_denied(Role::Viewer);
        let check = AccessCheck::read(Severity::Check);
        let action = DocAction::ModifyColumn {
            table_id: "Tasks".into(),
            col_id: "secret".into(),
            info: BTreeMap::new(),
        };
        assert!(filter_action_columns(action, &info, &check)
            .unwrap()
            .is_none());
    }

    #[test]
    fn pure_removals_pass_through() {
        let info = info_with_secret_denied(Role::Viewer);
        let check = AccessCheck::read(Severity::Check);
        let action = DocAction::BulkRemoveRecord { table_id: "Tasks".into(), row_ids: vec![1] };
        assert_eq!(
            filter_action_columns(action.clone(), &info, &check).unwrap(),
            Some(action)
        );
    }
}
