//! The active bundle: one atomic set of document actions with its undo
//! stream, moving through the gate's phases.

use std::sync::Arc;

use doc_model::meta::{is_acl_table, is_structural_table};
use doc_model::{scan_user_actions, DocAction, UserAction};

use crate::session::DocSession;
use crate::steps::ActionStep;

/// Phases of the gate's state machine. Linear, no back-edges; absence of a
/// bundle is the idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundlePhase {
    Open,
    Verified,
    Applied,
}

pub struct ActionBundle {
    pub session: Arc<DocSession>,
    pub user_actions: Vec<UserAction>,
    pub doc_actions: Vec<DocAction>,
    pub undo: Vec<DocAction>,
    pub phase: BundlePhase,
    pub applied: bool,
    /// Some user action explicitly targets an access rule table.
    pub has_deliberate_rule_change: bool,
    /// Steps are computed once per bundle and reused for every viewer.
    pub steps: tokio::sync::OnceCell<Arc<Vec<ActionStep>>>,
}

impl ActionBundle {
    pub fn new(
        session: Arc<DocSession>,
        user_actions: Vec<UserAction>,
        doc_actions: Vec<DocAction>,
        undo: Vec<DocAction>,
    ) -> Self {
        let has_deliberate_rule_change = scan_for_rule_change(&user_actions);
        Self {
            session,
            user_actions,
            doc_actions,
            undo,
            phase: BundlePhase::Open,
            applied: false,
            has_deliberate_rule_change,
            steps: tokio::sync::OnceCell::new(),
        }
    }

    /// Any committed action targeting an access rule table.
    pub fn touches_acl_tables(&self) -> bool {
        self.doc_actions
            .iter()
            .any(|action| is_acl_table(action.table_id()))
    }

    /// Any committed action changing schema or structural metadata.
    pub fn touches_schema(&self) -> bool {
        self.doc_actions
            .iter()
            .any(|action| action.is_schema_action() || is_structural_table(action.table_id()))
    }
}

/// Scan user actions, descending through undo/apply containers, for an
/// explicit reference to an access rule table.
fn scan_for_rule_change(actions: &[UserAction]) -> bool {
    let mut found = false;
    scan_user_actions(actions, &mut |action| {
        if action.table_id().map(is_acl_table).unwrap_or(false) {
            found = true;
            return false;
        }
        true
    });
    found
}
