//! Compiled rules grouped by resource, built from the structural tables.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use doc_model::meta::{ACL_RESOURCES_TABLE, ACL_RULES_TABLE, COLUMNS_TABLE, TABLES_TABLE};
use doc_model::{DocData, RecordView, RowId};
use serde_json::Value;
use tracing::warn;

use crate::errors::RuleError;
use crate::formula::{CompiledFormula, FormulaCompiler};
use crate::perms::{AccessAxis, PartialPermissionSet};

/// Wildcard resource table id.
const ANY_TABLE: &str = "*";
/// Resource table id for document-level special permissions.
const SPECIAL_TABLE: &str = "*SPECIAL";

/// Known special resource names.
pub const SPECIAL_ACCESS_RULES: &str = "AccessRules";
pub const SPECIAL_FULL_COPIES: &str = "FullCopies";

/// Column scope of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColIdSpec {
    All,
    List(Vec<String>),
}

impl ColIdSpec {
    pub fn parse(text: &str) -> ColIdSpec {
        let text = text.trim();
        if text.is_empty() || text == "*" {
            return ColIdSpec::All;
        }
        ColIdSpec::List(
            text.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn matches(&self, col_id: &str) -> bool {
        match self {
            ColIdSpec::All => true,
            ColIdSpec::List(cols) => cols.iter().any(|c| c == col_id),
        }
    }
}

/// One compiled rule: predicate, permission delta, optional author memo.
#[derive(Debug, Clone)]
pub struct AclRule {
    pub origin: RowId,
    pub formula: CompiledFormula,
    pub permissions: PartialPermissionSet,
    pub memo: Option<String>,
    pub rule_pos: f64,
}

/// The ordered rules attached to one resource.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub table_id: String,
    pub col_ids: ColIdSpec,
    pub body: Vec<AclRule>,
}

impl RuleSet {
    fn has_row_rule(&self, axis: AccessAxis) -> bool {
        self.body
            .iter()
            .any(|rule| rule.formula.uses_rec && rule.permissions.get(axis).is_some())
    }
}

/// A rule that attaches a looked-up record to the user object.
#[derive(Debug, Clone)]
pub struct UserAttributeRule {
    pub origin: RowId,
    pub name: String,
    pub table_id: String,
    pub lookup_col_id: String,
    pub char_id: String,
}

/// All compiled rules of one document revision. Construction never throws;
/// malformed input is reported through `rule_error`.
#[derive(Debug, Default)]
pub struct RuleCollection {
    doc_rules: Option<RuleSet>,
    table_rules: HashMap<String, Vec<RuleSet>>,
    special_rules: HashMap<String, RuleSet>,
    user_attr_rules: Vec<UserAttributeRule>,
    rule_error: Option<RuleError>,
    rule_count: usize,
}

impl RuleCollection {
    /// Build from a snapshot holding the rule and resource tables. Missing
    /// tables mean an empty collection.
    pub fn build(doc_data: &DocData, compiler: &dyn FormulaCompiler) -> RuleCollection {
        let mut out = RuleCollection::default();

        let resources: HashMap<RowId, (String, ColIdSpec)> = match doc_data
            .get_table(ACL_RESOURCES_TABLE)
        {
            Some(table) => {
                let table = Arc::new(table.clone());
                (0..table.len())
                    .map(|i| {
                        let row = RecordView::new(table.clone(), i);
                        let table_id =
                            row.get("tableId").as_str().unwrap_or_default().to_string();
                        let col_ids =
                            ColIdSpec::parse(row.get("colIds").as_str().unwrap_or_default());
                        (row.row_id(), (table_id, col_ids))
                    })
                    .collect()
            }
            None => HashMap::new(),
        };

        let rules_table = match doc_data.get_table(ACL_RULES_TABLE) {
            Some(table) => Arc::new(table.clone()),
            None => return out,
        };

        // Rules collected per resource row id, assembled into sets afterwards.
        let mut buckets: HashMap<RowId, Vec<AclRule>> = HashMap::new();
        for i in 0..rules_table.len() {
            let row = RecordView::new(rules_table.clone(), i);
            let user_attributes = row.get("userAttributes");
            if let Some(text) = user_attributes.as_str() {
                if !text.trim().is_empty() {
                    match parse_user_attribute(row.row_id(), text) {
                        Ok(rule) => out.user_attr_rules.push(rule),
                        Err(err) => out.note_error(err),
                    }
                    continue;
                }
            }
            let rule = match build_rule(&row, compiler) {
                Ok(rule) => rule,
                Err(err) => {
                    out.note_error(err);
                    continue;
                }
            };
            let resource = row.get("resource").as_i64().unwrap_or(0);
            if !resources.contains_key(&resource) {
                out.note_error(RuleError::BadResource(format!(
                    "rule {} references missing resource {resource}",
                    row.row_id()
                )));
                continue;
            }
            buckets.entry(resource).or_default().push(rule);
        }

        for (resource, mut body) in buckets {
            body.sort_by(|a, b| {
                a.rule_pos
                    .partial_cmp(&b.rule_pos)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.origin.cmp(&b.origin))
            });
            out.rule_count += body.len();
            let Some((table_id, col_ids)) = resources.get(&resource).cloned() else {
                continue;
            };
            let set = RuleSet { table_id: table_id.clone(), col_ids: col_ids.clone(), body };
            if table_id == ANY_TABLE {
                match &mut out.doc_rules {
                    Some(existing) => existing.body.extend(set.body),
                    None => out.doc_rules = Some(set),
                }
            } else if table_id == SPECIAL_TABLE {
                let name = match &col_ids {
                    ColIdSpec::List(cols) if cols.len() == 1 => cols[0].clone(),
                    _ => {
                        out.note_error(RuleError::BadResource(
                            "special resource must name exactly one permission".into(),
                        ));
                        continue;
                    }
                };
                if name != SPECIAL_ACCESS_RULES && name != SPECIAL_FULL_COPIES {
                    out.note_error(RuleError::BadResource(format!(
                        "unknown special resource: {name}"
                    )));
                    continue;
                }
                match out.special_rules.get_mut(&name) {
                    Some(existing) => existing.body.extend(set.body),
                    None => {
                        out.special_rules.insert(name, set);
                    }
                }
            } else {
                out.table_rules.entry(table_id).or_default().push(set);
            }
        }

        // Column-specific sets take precedence over the table wildcard set.
        for sets in out.table_rules.values_mut() {
            sets.sort_by_key(|set| matches!(set.col_ids, ColIdSpec::All));
        }
        out
    }

    fn note_error(&mut self, err: RuleError) {
        warn!("access rule problem: {err}");
        if self.rule_error.is_none() {
            self.rule_error = Some(err);
        }
    }

    /// First problem seen while building, if any. A collection with an error
    /// must not be used to grant access.
    pub fn rule_error(&self) -> Option<&RuleError> {
        self.rule_error.as_ref()
    }

    /// Whether any rule exists at all (including user-attribute rules).
    pub fn have_rules(&self) -> bool {
        self.rule_count > 0 || !self.user_attr_rules.is_empty() || !self.special_rules.is_empty()
    }

    pub fn get_user_attribute_rules(&self) -> &[UserAttributeRule] {
        &self.user_attr_rules
    }

    /// Tables consulted by user-attribute rules.
    pub fn user_attr_source_tables(&self) -> HashSet<String> {
        self.user_attr_rules
            .iter()
            .map(|rule| rule.table_id.clone())
            .collect()
    }

    pub fn special_rule_set(&self, name: &str) -> Option<&RuleSet> {
        self.special_rules.get(name)
    }

    /// The document-wide rule set, if any.
    pub fn doc_rule_set(&self) -> Option<&RuleSet> {
        self.doc_rules.as_ref()
    }

    /// Rule sets governing a whole-table request, most specific first.
    pub fn rule_sets_for_table(&self, table_id: &str) -> Vec<&RuleSet> {
        let mut sets: Vec<&RuleSet> = self
            .table_rules
            .get(table_id)
            .map(|all| {
                all.iter()
                    .filter(|set| set.col_ids == ColIdSpec::All)
                    .collect()
            })
            .unwrap_or_default();
        if let Some(doc) = &self.doc_rules {
            sets.push(doc);
        }
        sets
    }

    /// Rule sets governing one column, most specific first.
    pub fn rule_sets_for_column(&self, table_id: &str, col_id: &str) -> Vec<&RuleSet> {
        let mut sets: Vec<&RuleSet> = Vec::new();
        if let Some(all) = self.table_rules.get(table_id) {
            for set in all {
                if set.col_ids.matches(col_id) {
                    sets.push(set);
                }
            }
        }
        if let Some(doc) = &self.doc_rules {
            sets.push(doc);
        }
        sets
    }

    /// Columns of a table that carry column-scoped rules.
    pub fn columns_with_rules(&self, table_id: &str) -> BTreeSet<String> {
        let mut cols = BTreeSet::new();
        if let Some(all) = self.table_rules.get(table_id) {
            for set in all {
                if let ColIdSpec::List(list) = &set.col_ids {
                    cols.extend(list.iter().cloned());
                }
            }
        }
        cols
    }

    /// Tables that carry table- or column-scoped rules.
    pub fn tables_with_rules(&self) -> BTreeSet<String> {
        self.table_rules.keys().cloned().collect()
    }

    /// Whether any rule touching `axis` on this table needs a record to
    /// evaluate.
    pub fn table_has_row_rules(&self, table_id: &str, axis: AccessAxis) -> bool {
        let table_sets = self
            .table_rules
            .get(table_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        table_sets
            .iter()
            .chain(self.doc_rules.as_ref())
            .any(|set| set.has_row_rule(axis))
    }

    /// Structural cross-check: every resource must reference a live table and
    /// live columns, as must every user-attribute rule.
    pub fn check_doc_entities(&self, doc_data: &DocData) -> Result<(), RuleError> {
        let tables = doc_data
            .get_table(TABLES_TABLE)
            .ok_or_else(|| RuleError::EntityCheck("missing table registry".into()))?;
        let tables = Arc::new(tables.clone());
        let mut table_row_by_id: HashMap<String, RowId> = HashMap::new();
        for i in 0..tables.len() {
            let row = RecordView::new(tables.clone(), i);
            if let Some(id) = row.get("tableId").as_str() {
                table_row_by_id.insert(id.to_string(), row.row_id());
            }
        }
        let columns = doc_data
            .get_table(COLUMNS_TABLE)
            .ok_or_else(|| RuleError::EntityCheck("missing column registry".into()))?;
        let columns = Arc::new(columns.clone());
        let mut live_cols: HashSet<(RowId, String)> = HashSet::new();
        for i in 0..columns.len() {
            let row = RecordView::new(columns.clone(), i);
            let parent = row.get("parentId").as_i64().unwrap_or(0);
            if let Some(col_id) = row.get("colId").as_str() {
                live_cols.insert((parent, col_id.to_string()));
            }
        }

        let check_table = |table_id: &str| -> Result<RowId, RuleError> {
            table_row_by_id.get(table_id).copied().ok_or_else(|| {
                RuleError::EntityCheck(format!("rule resource references unknown table {table_id}"))
            })
        };
        for (table_id, sets) in &self.table_rules {
            let table_row = check_table(table_id)?;
            for set in sets {
                if let ColIdSpec::List(cols) = &set.col_ids {
                    for col in cols {
                        if !live_cols.contains(&(table_row, col.clone())) {
                            return Err(RuleError::EntityCheck(format!(
                                "rule resource references unknown column {table_id}.{col}"
                            )));
                        }
                    }
                }
            }
        }
        for rule in &self.user_attr_rules {
            let table_row = check_table(&rule.table_id)?;
            if !live_cols.contains(&(table_row, rule.lookup_col_id.clone())) {
                return Err(RuleError::EntityCheck(format!(
                    "user attribute {} references unknown column {}.{}",
                    rule.name, rule.table_id, rule.lookup_col_id
                )));
            }
        }
        Ok(())
    }
}

fn build_rule(row: &RecordView, compiler: &dyn FormulaCompiler) -> Result<AclRule, RuleError> {
    let formula_text = row.get("aclFormula").as_str().unwrap_or_default().to_string();
    let formula = if formula_text.trim().is_empty() {
        CompiledFormula::always_true()
    } else {
        compiler.compile(&formula_text)?
    };
    let permissions_text = row
        .get("permissionsText")
        .as_str()
        .unwrap_or_default()
        .to_string();
    let permissions = PartialPermissionSet::parse(&permissions_text)?;
    let memo = row
        .get("memo")
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let rule_pos = row.get("rulePos").as_f64().unwrap_or(0.0);
    Ok(AclRule {
        origin: row.row_id(),
        formula,
        permissions,
        memo,
        rule_pos,
    })
}

fn parse_user_attribute(origin: RowId, text: &str) -> Result<UserAttributeRule, RuleError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RuleError::BadResource(format!("bad user attribute payload: {e}")))?;
    let field = |key: &str| -> Result<String, RuleError> {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                RuleError::BadResource(format!("user attribute missing field {key}"))
            })
    };
    Ok(UserAttributeRule {
        origin,
        name: field("name")?,
        table_id: field("tableId")?,
        lookup_col_id: field("lookupColId")?,
        char_id: field("charId")?,
    })
}
