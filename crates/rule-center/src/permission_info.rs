//! Lazy, memoized permission evaluation for one user against one rule
//! collection.

use std::collections::HashMap;
use std::sync::Arc;

use doc_model::RecordView;
use parking_lot::Mutex;
use tracing::warn;

use crate::collection::{RuleCollection, RuleSet, SPECIAL_ACCESS_RULES, SPECIAL_FULL_COPIES};
use crate::formula::EvalContext;
use crate::perms::{
    AccessAxis, PermBit, PermValue, PermissionMerge, PermissionSetWithContext,
    PartialPermissionSet, RuleType,
};
use crate::user::UserInfo;

/// Summary of a table's read permission used to pick a filtering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableReadDisposition {
    /// Uniformly readable.
    Allow,
    /// Uniformly unreadable.
    Deny,
    /// Some read rule needs a record: decide per row.
    MixedRows,
    /// Only column rules vary: column pruning suffices.
    MixedColumns,
}

/// Evaluates `(user, rec?, newRec?) -> PermissionSet` per table or column,
/// memoizing record-free requests.
pub struct PermissionInfo {
    rules: Arc<RuleCollection>,
    user: Arc<UserInfo>,
    table_cache: Mutex<HashMap<String, Arc<PermissionSetWithContext>>>,
    column_cache: Mutex<HashMap<(String, String), Arc<PermissionSetWithContext>>>,
    full_cache: Mutex<Option<Arc<PermissionSetWithContext>>>,
}

impl PermissionInfo {
    pub fn new(rules: Arc<RuleCollection>, user: Arc<UserInfo>) -> Self {
        Self {
            rules,
            user,
            table_cache: Mutex::new(HashMap::new()),
            column_cache: Mutex::new(HashMap::new()),
            full_cache: Mutex::new(None),
        }
    }

    pub fn user(&self) -> &Arc<UserInfo> {
        &self.user
    }

    pub fn rules(&self) -> &Arc<RuleCollection> {
        &self.rules
    }

    /// Record-free table verdict; row-dependent rules contribute mixed bits.
    pub fn get_table_access(&self, table_id: &str) -> Arc<PermissionSetWithContext> {
        if let Some(hit) = self.table_cache.lock().get(table_id) {
            return hit.clone();
        }
        let sets = self.rules.rule_sets_for_table(table_id);
        let access = Arc::new(self.merge_sets(&sets, None, None, RuleType::Table));
        self.table_cache
            .lock()
            .insert(table_id.to_string(), access.clone());
        access
    }

    /// Record-free column verdict.
    pub fn get_column_access(&self, table_id: &str, col_id: &str) -> Arc<PermissionSetWithContext> {
        let key = (table_id.to_string(), col_id.to_string());
        if let Some(hit) = self.column_cache.lock().get(&key) {
            return hit.clone();
        }
        let sets = self.rules.rule_sets_for_column(table_id, col_id);
        let access = Arc::new(self.merge_sets(&sets, None, None, RuleType::Column));
        self.column_cache.lock().insert(key, access.clone());
        access
    }

    /// Table verdict with a concrete record: every predicate is evaluable.
    pub fn get_table_access_for_record(
        &self,
        table_id: &str,
        rec: Option<&RecordView>,
        new_rec: Option<&RecordView>,
    ) -> PermissionSetWithContext {
        let sets = self.rules.rule_sets_for_table(table_id);
        self.merge_sets(&sets, rec, new_rec, RuleType::Row)
    }

    /// Column verdict with a concrete record.
    pub fn get_column_access_for_record(
        &self,
        table_id: &str,
        col_id: &str,
        rec: Option<&RecordView>,
        new_rec: Option<&RecordView>,
    ) -> PermissionSetWithContext {
        let sets = self.rules.rule_sets_for_column(table_id, col_id);
        self.merge_sets(&sets, rec, new_rec, RuleType::Row)
    }

    /// Document-wide summary: pessimistic across every scoped rule set.
    pub fn get_full_access(&self) -> Arc<PermissionSetWithContext> {
        if let Some(hit) = self.full_cache.lock().as_ref() {
            return hit.clone();
        }
        let doc_sets: Vec<&RuleSet> = self.rules.doc_rule_set().into_iter().collect();
        let doc_base = self.merge_sets(&doc_sets, None, None, RuleType::Default);
        let mut scoped: Vec<PermissionSetWithContext> = vec![doc_base];
        for table_id in self.rules.tables_with_rules() {
            scoped.push((*self.get_table_access(&table_id)).clone());
            for col_id in self.rules.columns_with_rules(&table_id) {
                scoped.push((*self.get_column_access(&table_id, &col_id)).clone());
            }
        }
        let mut perms = scoped[0].perms;
        for axis in AccessAxis::ALL {
            let first = scoped[0].perms.get(axis);
            let uniform = scoped.iter().all(|ps| ps.perms.get(axis) == first);
            perms.set(
                axis,
                if uniform && first != PermValue::Mixed { first } else { PermValue::Mixed },
            );
        }
        let mut out = PermissionSetWithContext::new(perms, RuleType::Default);
        for ps in &scoped {
            for (axis, memos) in &ps.memos {
                out.memos.entry(*axis).or_default().extend(memos.iter().cloned());
            }
        }
        let out = Arc::new(out);
        *self.full_cache.lock() = Some(out.clone());
        out
    }

    /// Strategy summary for outgoing row filtering.
    pub fn table_read_disposition(&self, table_id: &str) -> TableReadDisposition {
        if self.rules.table_has_row_rules(table_id, AccessAxis::Read) {
            return TableReadDisposition::MixedRows;
        }
        let table_read = self.get_table_access(table_id).perms.read;
        let mut verdicts = vec![table_read];
        for col_id in self.rules.columns_with_rules(table_id) {
            verdicts.push(self.get_column_access(table_id, &col_id).perms.read);
        }
        if verdicts.iter().all(|v| *v == PermValue::Allow) {
            TableReadDisposition::Allow
        } else if verdicts.iter().all(|v| *v == PermValue::Deny) {
            TableReadDisposition::Deny
        } else {
            TableReadDisposition::MixedColumns
        }
    }

    /// Verdict on a special document permission (`AccessRules`,
    /// `FullCopies`). Owners hold them by default.
    pub fn get_special_access(&self, name: &str) -> PermValue {
        debug_assert!(name == SPECIAL_ACCESS_RULES || name == SPECIAL_FULL_COPIES);
        let default = if self.user.is_owner() { PermValue::Allow } else { PermValue::Deny };
        match self.rules.special_rule_set(name) {
            Some(set) => {
                let merged = self.merge_sets(&[set], None, None, RuleType::Special);
                match merged.perms.read {
                    PermValue::Mixed => default,
                    value => value,
                }
            }
            None => default,
        }
    }

    fn merge_sets(
        &self,
        sets: &[&RuleSet],
        rec: Option<&RecordView>,
        new_rec: Option<&RecordView>,
        rule_type: RuleType,
    ) -> PermissionSetWithContext {
        let mut merge = PermissionMerge::default();
        let ctx = EvalContext { user: &self.user, rec, new_rec };
        'sets: for set in sets {
            for rule in &set.body {
                if merge.is_complete() {
                    break 'sets;
                }
                if rule.formula.uses_rec && rec.is_none() {
                    merge.absorb_row_dependent(&rule.permissions, rule.memo.as_deref());
                    continue;
                }
                match rule.formula.eval(&ctx) {
                    Ok(true) => merge.absorb(&rule.permissions, rule.memo.as_deref()),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            formula = %rule.formula.text,
                            "access rule evaluation failed, denying its bits: {err}"
                        );
                        let mut deny = PartialPermissionSet::default();
                        for (axis, _) in rule.permissions.axes() {
                            deny = deny.set(axis, PermBit::Deny);
                        }
                        merge.absorb(&deny, rule.memo.as_deref());
                    }
                }
            }
        }
        merge.finalize(&self.user.default_permissions(), rule_type)
    }
}
