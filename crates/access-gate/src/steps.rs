//! Materialization of a committed bundle into per-action steps carrying the
//! table state before and after each action, plus the rule state in force.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use doc_model::meta::{is_acl_table, is_structural_table};
use doc_model::{DocAction, DocData, DocError, DocStorage, RowId, TableDataAction};
use rule_center::{FormulaCompiler, Ruler};
use tracing::{debug, warn};

use crate::errors::GateError;

/// One action within a bundle, with its pre- and post-state snapshots.
pub struct ActionStep {
    pub action: DocAction,
    pub rows_before: Option<Arc<TableDataAction>>,
    pub rows_after: Option<Arc<TableDataAction>>,
    pub meta_before: Option<HashMap<String, Arc<TableDataAction>>>,
    pub meta_after: Option<HashMap<String, Arc<TableDataAction>>>,
    /// Rule state produced by all rule changes strictly before this step.
    pub ruler: Arc<Ruler>,
}

/// Row ids touched per table, across the bundle and its undo stream.
pub fn related_rows(actions: &[DocAction], undo: &[DocAction]) -> HashMap<String, BTreeSet<RowId>> {
    let mut related: HashMap<String, BTreeSet<RowId>> = HashMap::new();
    for action in actions.iter().chain(undo) {
        if let Some(row_ids) = action.row_ids() {
            related
                .entry(action.table_id().to_string())
                .or_default()
                .extend(row_ids);
        }
    }
    related
}

/// The last post-state snapshot of a table across the rest of the bundle,
/// used to fill `newRec`. If a row id is removed and re-added later in the
/// same bundle this aliases the later incarnation, and a column renamed
/// mid-bundle is not mapped back; both behaviors are inherited and accepted.
pub fn rows_for_new_rec(
    steps: &[ActionStep],
    index: usize,
    table_id: &str,
) -> Option<Arc<TableDataAction>> {
    steps[index..]
        .iter()
        .rev()
        .find_map(|step| {
            step.rows_after
                .as_ref()
                .filter(|rows| rows.table_id == table_id)
                .cloned()
        })
}

/// Build the step sequence for a bundle.
///
/// `applied` says whether the actions are already committed to storage; if
/// so the undo stream is replayed in reverse to rewind the scratch snapshots
/// to the pre-bundle state before stepping forward.
pub async fn build_steps(
    doc_actions: &[DocAction],
    undo: &[DocAction],
    applied: bool,
    storage: &dyn DocStorage,
    live_meta: &HashMap<String, Arc<TableDataAction>>,
    base_ruler: Arc<Ruler>,
    compiler: &dyn FormulaCompiler,
) -> Result<Vec<ActionStep>, GateError> {
    let related = related_rows(doc_actions, undo);
    let mut scratch = DocData::new();
    for (table_id, row_ids) in &related {
        let ids: Vec<RowId> = row_ids.iter().copied().collect();
        match scratch.sync_from(storage, table_id, &ids).await {
            Ok(()) => {}
            Err(DocError::TableNotFound(_)) => {
                // Created within this bundle; starts empty.
                scratch.sync_table(TableDataAction::new(table_id.clone()));
            }
            Err(err) => return Err(err.into()),
        }
    }

    let need_meta = doc_actions
        .iter()
        .any(|action| action.is_schema_action() || is_structural_table(action.table_id()));
    let mut meta_doc = if need_meta {
        Some(DocData::from_tables(
            live_meta.values().map(|table| (**table).clone()),
        ))
    } else {
        None
    };

    if applied {
        for action in undo.iter().rev() {
            apply_leniently(&mut scratch, action);
            if let Some(meta) = meta_doc.as_mut() {
                if is_structural_table(action.table_id()) {
                    apply_leniently(meta, action);
                }
            }
        }
    }

    let mut meta_cow: HashMap<String, Arc<TableDataAction>> = match &meta_doc {
        Some(meta) => meta
            .table_ids()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|id| meta.get_table(&id).map(|t| (id.clone(), Arc::new(t.clone()))))
            .collect(),
        None => HashMap::new(),
    };

    let mut steps = Vec::with_capacity(doc_actions.len());
    let mut ruler = base_ruler;
    let mut replace_ruler = false;
    for action in doc_actions {
        let table_id = action.table_id().to_string();
        // Adjacent rule-table edits are batched: the rebuilt ruler takes
        // effect only once the run of rule-table actions ends, so predicate
        // evaluation never sees rules without their resources.
        if replace_ruler && !is_acl_table(&table_id) {
            if let Some(meta) = &meta_doc {
                ruler = Arc::new(Ruler::build(meta, compiler));
                debug!("rebuilt ruler mid-bundle after rule table changes");
            }
            replace_ruler = false;
        }

        let rows_before = scratch.get_table(&table_id).cloned().map(Arc::new);
        let meta_before = need_meta.then(|| meta_cow.clone());

        if action.is_data_action() {
            scratch.receive_action(action)?;
        } else {
            apply_leniently(&mut scratch, action);
        }
        let structural = is_structural_table(&table_id);
        if structural {
            if let Some(meta) = meta_doc.as_mut() {
                apply_leniently(meta, action);
                if let Some(table) = meta.get_table(&table_id) {
                    meta_cow.insert(table_id.clone(), Arc::new(table.clone()));
                }
            }
        }

        let after_table_id = match action {
            DocAction::RenameTable { new_table_id, .. } => new_table_id.as_str(),
            _ => table_id.as_str(),
        };
        let rows_after = scratch
            .get_table(after_table_id)
            .cloned()
            .map(Arc::new)
            .or_else(|| rows_before.clone());
        let meta_after = need_meta.then(|| meta_cow.clone());

        if is_acl_table(&table_id) {
            replace_ruler = true;
        }
        steps.push(ActionStep {
            action: action.clone(),
            rows_before,
            rows_after,
            meta_before,
            meta_after,
            ruler: ruler.clone(),
        });
    }
    Ok(steps)
}

/// Apply an action that may legitimately reference state outside the partial
/// scratch snapshot; anything structural that is missing is skipped.
fn apply_leniently(doc: &mut DocData, action: &DocAction) {
    match doc.receive_action(action) {
        Ok(()) => {}
        Err(
            err @ (DocError::TableNotFound(_)
            | DocError::ColumnNotFound(_, _)
            | DocError::RowNotFound(_, _)),
        ) => {
            warn!(action = action.name(), "skipping action on partial snapshot: {err}");
        }
        Err(err) => {
            warn!(action = action.name(), "unexpected error on partial snapshot: {err}");
        }
    }
}
