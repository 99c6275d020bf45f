//! User actions: the higher-level commands the data engine lowers to
//! document actions, and their ingress classification.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::errors::DocError;
use crate::value::CellValue;

/// A host command before lowering. The argument list stays loosely typed;
/// only the name and the leading table id are interpreted here.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAction {
    pub name: String,
    pub args: Vec<CellValue>,
}

/// Ingress classification buckets. Closed sets, matched by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserActionClass {
    /// Always allowed.
    Ok,
    /// Allowed only without nuanced restrictions.
    Special,
    /// Allowed only to full-access users.
    Surprising,
    /// Row operations, checked against table/column permissions.
    Data,
    /// Recursive containers whose payload is a nested action list.
    Reflective,
    /// Everything else: undecidable before lowering.
    Deferred,
}

static OK_ACTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| HashSet::from(["Calculate"]));

static SPECIAL_ACTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "InitNewDoc",
        "EvalCode",
        "SetDisplayFormula",
        "UpdateSummaryViewSection",
        "DetachSummaryViewSection",
        "GenImporterView",
        "TransformAndFinishImport",
        "AddView",
        "CopyFromColumn",
        "AddHiddenColumn",
    ])
});

static SURPRISING_ACTIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["RemoveView", "AddViewSection"]));

static DATA_ACTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "AddRecord",
        "BulkAddRecord",
        "UpdateRecord",
        "BulkUpdateRecord",
        "RemoveRecord",
        "BulkRemoveRecord",
        "ReplaceTableData",
        "TableData",
    ])
});

const CONTAINER_ACTIONS: &[&str] = &["ApplyUndoActions", "ApplyDocActions"];

impl UserAction {
    pub fn new(name: impl Into<String>, args: Vec<CellValue>) -> Self {
        Self { name: name.into(), args }
    }

    /// Parse the positional wire shape: `[name, ...args]`.
    pub fn from_wire(value: &Value) -> Result<UserAction, DocError> {
        let parts = value
            .as_array()
            .ok_or_else(|| DocError::BadAction("user action must be an array".into()))?;
        let name = parts
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| DocError::BadAction("user action missing name".into()))?;
        Ok(UserAction::new(name, parts[1..].to_vec()))
    }

    pub fn classify(&self) -> UserActionClass {
        let name = self.name.as_str();
        if OK_ACTIONS.contains(name) {
            UserActionClass::Ok
        } else if SPECIAL_ACTIONS.contains(name) {
            UserActionClass::Special
        } else if SURPRISING_ACTIONS.contains(name) {
            UserActionClass::Surprising
        } else if DATA_ACTIONS.contains(name) {
            UserActionClass::Data
        } else if CONTAINER_ACTIONS.contains(&name) {
            UserActionClass::Reflective
        } else {
            UserActionClass::Deferred
        }
    }

    /// Leading table id, when the first argument carries one.
    pub fn table_id(&self) -> Option<&str> {
        self.args.first().and_then(Value::as_str)
    }

    /// Nested actions of a reflective container, empty otherwise.
    pub fn nested(&self) -> Vec<UserAction> {
        if self.classify() != UserActionClass::Reflective {
            return Vec::new();
        }
        self.args
            .first()
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| UserAction::from_wire(item).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Visit every action, descending recursively through reflective containers.
/// The visitor returns true to keep scanning.
pub fn scan_user_actions(actions: &[UserAction], visit: &mut dyn FnMut(&UserAction) -> bool) -> bool {
    for action in actions {
        if !visit(action) {
            return false;
        }
        let nested = action.nested();
        if !nested.is_empty() && !scan_user_actions(&nested, visit) {
            return false;
        }
    }
    true
}
