//! Binding of a permission axis to a check severity, and the mapping from
//! actions to the axis they must clear.

use doc_model::meta::is_meta_table;
use doc_model::DocAction;
use thiserror::Error;

use crate::perms::{AccessAxis, PermValue, PermissionSetWithContext};

/// How a failed check surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The caller inspects the verdict.
    Check,
    /// A denial aborts the operation.
    Fatal,
}

/// A denial, carrying the memos of the rules that caused it.
#[derive(Debug, Clone, Error)]
#[error("access denied on {axis:?}")]
pub struct AccessDenied {
    pub axis: AccessAxis,
    pub memos: Vec<String>,
}

/// One permission axis bound to a severity.
#[derive(Debug, Clone, Copy)]
pub struct AccessCheck {
    pub axis: AccessAxis,
    pub severity: Severity,
}

impl AccessCheck {
    pub fn new(axis: AccessAxis, severity: Severity) -> Self {
        Self { axis, severity }
    }

    pub fn read(severity: Severity) -> Self {
        Self::new(AccessAxis::Read, severity)
    }

    /// Raw verdict for this check's axis.
    pub fn get(&self, ps: &PermissionSetWithContext) -> PermValue {
        ps.perms.get(self.axis)
    }

    /// Error out on an explicit denial.
    pub fn throw_if_denied(&self, ps: &PermissionSetWithContext) -> Result<(), AccessDenied> {
        match self.get(ps) {
            PermValue::Deny => Err(AccessDenied {
                axis: self.axis,
                memos: ps.memos_for(self.axis).to_vec(),
            }),
            _ => Ok(()),
        }
    }

    /// Error out unless the verdict is a plain allow.
    pub fn throw_if_not_fully_allowed(
        &self,
        ps: &PermissionSetWithContext,
    ) -> Result<(), AccessDenied> {
        match self.get(ps) {
            PermValue::Allow => Ok(()),
            _ => Err(AccessDenied {
                axis: self.axis,
                memos: ps.memos_for(self.axis).to_vec(),
            }),
        }
    }
}

/// Axis an incoming action must clear: structural-table actions and schema
/// actions need schema rights, row actions their row operation.
pub fn access_check_for_action(action: &DocAction, severity: Severity) -> AccessCheck {
    let axis = if is_meta_table(action.table_id()) || action.is_schema_action() {
        AccessAxis::SchemaEdit
    } else if action.is_update() {
        AccessAxis::Update
    } else if action.is_removal() {
        AccessAxis::Delete
    } else {
        AccessAxis::Create
    };
    AccessCheck::new(axis, severity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perms::{PermissionSet, RuleType};

    fn ps(read: PermValue) -> PermissionSetWithContext {
        let mut perms = PermissionSet::uniform(PermValue::Allow);
        perms.read = read;
        let mut out = PermissionSetWithContext::new(perms, RuleType::Table);
        out.memos.insert(AccessAxis::Read, vec!["ask the owner".into()]);
        out
    }

    #[test]
    fn denial_carries_memos() {
        let check = AccessCheck::read(Severity::Fatal);
        let err = check.throw_if_denied(&ps(PermValue::Deny)).unwrap_err();
        assert_eq!(err.memos, vec!["ask the owner".to_string()]);
        assert!(check.throw_if_denied(&ps(PermValue::Mixed)).is_ok());
        assert!(check
            .throw_if_not_fully_allowed(&ps(PermValue::Mixed))
            .is_err());
    }

    #[test]
    fn action_axis_mapping() {
        let update = DocAction::UpdateRecord {
            table_id: "Tasks".into(),
            row_id: 1,
            columns: Default::default(),
        };
        assert_eq!(
            access_check_for_action(&update, Severity::Check).axis,
            AccessAxis::Update
        );
        let meta_update = DocAction::UpdateRecord {
            table_id: "_grist_Tables".into(),
            row_id: 1,
            columns: Default::default(),
        };
        assert_eq!(
            access_check_for_action(&meta_update, Severity::Check).axis,
            AccessAxis::SchemaEdit
        );
        let remove = DocAction::RemoveRecord { table_id: "Tasks".into(), row_id: 1 };
        assert_eq!(
            access_check_for_action(&remove, Severity::Check).axis,
            AccessAxis::Delete
        );
        let rename = DocAction::RenameTable {
            table_id: "Tasks".into(),
            new_table_id: "Jobs".into(),
        };
        assert_eq!(
            access_check_for_action(&rename, Severity::Check).axis,
            AccessAxis::SchemaEdit
        );
    }
}
