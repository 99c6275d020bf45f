//! The access gate: a four-phase bundle state machine that checks incoming
//! changes and rewrites the outgoing stream per viewer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use doc_model::meta::{is_meta_table, is_structural_table, MANUAL_SORT, STRUCTURAL_TABLES};
use doc_model::{
    DocAction, DocData, DocStorage, Query, RecordEditor, RecordView, TableDataAction, UserAction,
    UserActionClass,
};
use rule_center::collection::{SPECIAL_ACCESS_RULES, SPECIAL_FULL_COPIES};
use rule_center::{
    access_check_for_action, AccessAxis, AccessCheck, FormulaCompiler, PermValue, PermissionInfo,
    RuleCollection, Ruler, Severity, TableReadDisposition, UserInfo,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bundle::{ActionBundle, BundlePhase};
use crate::censor::{CensorOutcome, CensorshipInfo};
use crate::column_filter::filter_action_columns;
use crate::config::GateConfig;
use crate::errors::{GateError, NEED_RELOAD};
use crate::row_filter::filter_row_level;
use crate::session::{session_key, DocSession, SessionKey, UserAttributes, UserOverride};
use crate::steps::{build_steps, rows_for_new_rec, ActionStep};
use crate::user_resolver::{HomeDb, UserResolver};

/// Summary metadata of one committed bundle, as shown to clients.
#[derive(Debug, Clone, Default)]
pub struct ActionGroup {
    pub action_num: i64,
    pub desc: Option<String>,
    pub action_summary: Option<Value>,
    pub ret_values: Option<Value>,
}

/// One outgoing `docUserAction` message, already filtered for its viewer.
#[derive(Debug, Clone)]
pub struct DocUpdateMessage {
    pub action_group: ActionGroup,
    pub doc_actions: Vec<DocAction>,
}

/// One subscribed client of the broadcast layer.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn session(&self) -> Arc<DocSession>;
    async fn send_update(&self, message: DocUpdateMessage) -> Result<(), GateError>;
    async fn send_error(&self, code: &'static str) -> Result<(), GateError>;
}

/// The client broadcaster, injected by the host.
pub trait Broadcaster: Send + Sync {
    fn subscribers(&self) -> Vec<Arc<dyn Subscriber>>;
}

struct GateState {
    bundle: Option<ActionBundle>,
    /// Present only between `applied_bundle` and `finished_bundle`, and only
    /// when a user-attribute source table was touched.
    prev_user_attributes: Option<HashMap<SessionKey, Arc<UserAttributes>>>,
}

/// The granular access control engine.
pub struct AccessGate {
    doc_data: Arc<parking_lot::RwLock<DocData>>,
    storage: Arc<dyn DocStorage>,
    broadcaster: Arc<dyn Broadcaster>,
    compiler: Arc<dyn FormulaCompiler>,
    config: GateConfig,
    ruler: parking_lot::RwLock<Arc<Ruler>>,
    resolver: UserResolver,
    state: Mutex<GateState>,
}

impl AccessGate {
    pub fn new(
        doc_data: Arc<parking_lot::RwLock<DocData>>,
        storage: Arc<dyn DocStorage>,
        home_db: Arc<dyn HomeDb>,
        broadcaster: Arc<dyn Broadcaster>,
        compiler: Arc<dyn FormulaCompiler>,
        config: GateConfig,
    ) -> Self {
        let ruler = Arc::new(Ruler::build(&doc_data.read(), compiler.as_ref()));
        Self {
            doc_data,
            storage: storage.clone(),
            broadcaster,
            compiler,
            config,
            ruler: parking_lot::RwLock::new(ruler),
            resolver: UserResolver::new(storage, home_db),
            state: Mutex::new(GateState { bundle: None, prev_user_attributes: None }),
        }
    }

    /// Rebuild rules from the current snapshot and drop per-session caches.
    pub fn update(&self) {
        // Steps in flight hold their own Arc<Ruler>; rule state is replaced
        // by pointer swap, never mutated in place.
        let ruler = Arc::new(Ruler::build(&self.doc_data.read(), self.compiler.as_ref()));
        *self.ruler.write() = ruler;
        self.resolver.attributes_cache().clear();
    }

    /// Drop everything cached for a closing session.
    pub fn release_session(&self, session: &Arc<DocSession>) {
        self.resolver.release(session);
        self.ruler.read().forget(session_key(session));
    }

    // ---- bundle state machine -------------------------------------------

    /// Start a bundle. Rejects overlap: at most one bundle is active.
    pub async fn begin(
        &self,
        session: Arc<DocSession>,
        user_actions: Vec<UserAction>,
        doc_actions: Vec<DocAction>,
        undo: Vec<DocAction>,
    ) -> Result<(), GateError> {
        let mut state = self.state.lock().await;
        if state.bundle.is_some() {
            return Err(GateError::BundleState("a bundle is already active".into()));
        }
        let bundle = ActionBundle::new(session, user_actions, doc_actions, undo);
        debug!(
            actions = bundle.doc_actions.len(),
            deliberate = bundle.has_deliberate_rule_change,
            "bundle opened"
        );
        state.bundle = Some(bundle);
        Ok(())
    }

    /// Decide whether the open bundle may be committed.
    pub async fn can_apply_bundle(&self) -> Result<(), GateError> {
        let mut state = self.state.lock().await;
        let bundle = state
            .bundle
            .as_mut()
            .ok_or_else(|| GateError::BundleState("no active bundle".into()))?;
        if bundle.phase != BundlePhase::Open {
            return Err(GateError::BundleState("bundle is not open".into()));
        }
        let ruler = self.current_ruler();

        if bundle.has_deliberate_rule_change {
            let user = self
                .get_user_for(&bundle.session, &ruler)
                .await
                .map_err(denial_for_ingress)?;
            if !user.is_owner() {
                info!("rejecting rule change from non-owner");
                return Err(GateError::AclDeny { memos: Vec::new() });
            }
        }

        if ruler.rules().have_rules() {
            let live_meta = self.live_meta();
            let steps = build_steps(
                &bundle.doc_actions,
                &bundle.undo,
                false,
                self.storage.as_ref(),
                &live_meta,
                ruler.clone(),
                self.compiler.as_ref(),
            )
            .await?;
            let perm_info = self
                .perm_info_for(&bundle.session, &ruler)
                .await
                .map_err(denial_for_ingress)?;
            for index in 0..steps.len() {
                self.check_incoming_doc_action(&steps, index, &perm_info)?;
            }
        }

        if bundle.touches_acl_tables() {
            self.simulate_rule_rebuild(&bundle.doc_actions)?;
        }

        bundle.phase = BundlePhase::Verified;
        Ok(())
    }

    /// Record that the host committed the bundle.
    pub async fn applied_bundle(&self) -> Result<(), GateError> {
        let mut state = self.state.lock().await;
        let Some(bundle) = state.bundle.as_mut() else {
            return Err(GateError::BundleState("no active bundle".into()));
        };
        if bundle.phase != BundlePhase::Verified {
            return Err(GateError::BundleState("bundle was not verified".into()));
        }
        bundle.phase = BundlePhase::Applied;
        bundle.applied = true;

        let ruler = self.current_ruler();
        let attr_tables = ruler.rules().user_attr_source_tables();
        let user_attr_change = bundle
            .doc_actions
            .iter()
            .any(|action| attr_tables.contains(action.table_id()));
        let touches_schema = bundle.touches_schema();
        if user_attr_change {
            debug!("user attribute source changed, keeping previous attributes for comparison");
            state.prev_user_attributes = Some(self.resolver.attributes_cache().take_entries());
        }
        if user_attr_change || touches_schema {
            ruler.clear_cache();
        }
        Ok(())
    }

    /// Broadcast the committed bundle, rewriting it per subscriber.
    pub async fn send_doc_update_for_bundle(
        &self,
        action_group: ActionGroup,
    ) -> Result<(), GateError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let Some(bundle) = state.bundle.as_ref() else {
            return Err(GateError::BundleState("no active bundle".into()));
        };
        if bundle.phase != BundlePhase::Applied {
            return Err(GateError::BundleState("bundle was not applied".into()));
        }
        let subscribers = self.broadcaster.subscribers();

        if bundle.has_deliberate_rule_change {
            info!("deliberate rule change: telling every subscriber to reload");
            for subscriber in subscribers {
                if let Err(err) = subscriber.send_error(NEED_RELOAD).await {
                    warn!("failed to deliver reload notice: {err}");
                }
            }
            return Ok(());
        }

        let steps = self.steps_for(bundle).await?;
        for subscriber in subscribers {
            let session = subscriber.session();
            let result = self
                .filter_for_viewer(
                    &session,
                    &steps,
                    &action_group,
                    state.prev_user_attributes.as_ref(),
                )
                .await;
            match result {
                Ok(message) => {
                    if let Err(err) = subscriber.send_update(message).await {
                        warn!("failed to deliver update: {err}");
                    }
                }
                Err(err) => {
                    if err.code() != Some(NEED_RELOAD) {
                        warn!("filtering failed for a subscriber, forcing reload: {err}");
                    }
                    if let Err(err) = subscriber.send_error(NEED_RELOAD).await {
                        warn!("failed to deliver reload notice: {err}");
                    }
                }
            }
        }
        Ok(())
    }

    /// Close the bundle, updating rules if it changed them. Idempotent, and
    /// safe to call after a failure at any phase.
    pub async fn finished_bundle(&self) -> Result<(), GateError> {
        let mut state = self.state.lock().await;
        let Some(bundle) = state.bundle.take() else {
            state.prev_user_attributes = None;
            return Ok(());
        };
        if bundle.applied && (bundle.touches_acl_tables() || bundle.touches_schema()) {
            // Pointer swap, not in-place update: broadcasts still draining
            // this bundle keep their step-local ruler snapshots.
            let ruler = Arc::new(Ruler::build(&self.doc_data.read(), self.compiler.as_ref()));
            *self.ruler.write() = ruler;
            debug!("rules rebuilt after bundle");
        }
        state.prev_user_attributes = None;
        Ok(())
    }

    // ---- host-facing queries --------------------------------------------

    pub async fn get_user(&self, session: &Arc<DocSession>) -> Result<Arc<UserInfo>, GateError> {
        let ruler = self.current_ruler();
        self.get_user_for(session, &ruler).await
    }

    /// The impersonation override in force for a session, if any.
    pub async fn get_user_override(
        &self,
        session: &Arc<DocSession>,
    ) -> Result<Option<UserOverride>, GateError> {
        self.get_user(session).await?;
        Ok(self
            .resolver
            .cached_attributes(session)
            .and_then(|attrs| attrs.override_user.clone()))
    }

    pub async fn has_table_access(
        &self,
        session: &Arc<DocSession>,
        table_id: &str,
    ) -> Result<bool, GateError> {
        let perm_info = self.session_perm_info(session).await?;
        Ok(perm_info.table_read_disposition(table_id) != TableReadDisposition::Deny)
    }

    pub async fn has_query_access(
        &self,
        session: &Arc<DocSession>,
        query: &Query,
    ) -> Result<bool, GateError> {
        self.has_table_access(session, &query.table_id).await
    }

    /// Rules exist and the user is not an owner.
    pub async fn has_nuanced_access(&self, session: &Arc<DocSession>) -> Result<bool, GateError> {
        if !self.current_ruler().rules().have_rules() {
            return Ok(false);
        }
        Ok(!self.has_full_access(session).await?)
    }

    /// Synonymous with ownership.
    pub async fn has_full_access(&self, session: &Arc<DocSession>) -> Result<bool, GateError> {
        Ok(self.get_user(session).await?.is_owner())
    }

    pub async fn can_read_everything(&self, session: &Arc<DocSession>) -> Result<bool, GateError> {
        let perm_info = self.session_perm_info(session).await?;
        Ok(perm_info.get_full_access().perms.read == PermValue::Allow)
    }

    pub async fn can_copy_everything(&self, session: &Arc<DocSession>) -> Result<bool, GateError> {
        Ok(self.has_full_copies_permission(session).await?
            || self.can_read_everything(session).await?)
    }

    /// Owners and readers-of-everything may probe values (autocomplete,
    /// find). There is no dedicated bit; the composite check is kept for
    /// compatibility.
    pub async fn can_scan_data(&self, session: &Arc<DocSession>) -> Result<bool, GateError> {
        Ok(self.has_full_access(session).await? || self.can_read_everything(session).await?)
    }

    pub async fn has_full_copies_permission(
        &self,
        session: &Arc<DocSession>,
    ) -> Result<bool, GateError> {
        let perm_info = self.session_perm_info(session).await?;
        Ok(perm_info.get_special_access(SPECIAL_FULL_COPIES) == PermValue::Allow)
    }

    pub async fn has_access_rules_permission(
        &self,
        session: &Arc<DocSession>,
    ) -> Result<bool, GateError> {
        let perm_info = self.session_perm_info(session).await?;
        Ok(perm_info.get_special_access(SPECIAL_ACCESS_RULES) == PermValue::Allow)
    }

    /// Pre-lowering gate: `Ok(true)` means allowed, `Ok(false)` means
    /// undecidable without lowering; a hard denial throws.
    pub async fn assert_can_maybe_apply_user_actions(
        &self,
        session: &Arc<DocSession>,
        actions: &[UserAction],
    ) -> Result<bool, GateError> {
        let ruler = self.current_ruler();
        if !ruler.rules().have_rules() {
            return Ok(true);
        }
        let user = self
            .get_user_for(session, &ruler)
            .await
            .map_err(denial_for_ingress)?;
        let perm_info = ruler.permission_info(session_key(session), &user);
        self.check_user_actions(&user, &perm_info, actions)
    }

    fn check_user_actions(
        &self,
        user: &UserInfo,
        perm_info: &PermissionInfo,
        actions: &[UserAction],
    ) -> Result<bool, GateError> {
        let mut decidable = true;
        for action in actions {
            match action.classify() {
                UserActionClass::Ok => {}
                UserActionClass::Special => {
                    if !user.is_owner() {
                        return Err(GateError::AclDeny { memos: Vec::new() });
                    }
                }
                UserActionClass::Surprising => {
                    if !user.is_owner() {
                        return Err(GateError::AclDeny { memos: Vec::new() });
                    }
                }
                UserActionClass::Data => {
                    let Some(table_id) = action.table_id() else {
                        decidable = false;
                        continue;
                    };
                    if doc_model::meta::is_acl_table(table_id) && !user.is_owner() {
                        return Err(GateError::AclDeny { memos: Vec::new() });
                    }
                    let axis = data_action_axis(&action.name, table_id);
                    let check = AccessCheck::new(axis, Severity::Fatal);
                    check.throw_if_denied(&perm_info.get_table_access(table_id))?;
                }
                UserActionClass::Reflective => {
                    let nested = action.nested();
                    if !self.check_user_actions(user, perm_info, &nested)? {
                        decidable = false;
                    }
                }
                UserActionClass::Deferred => decidable = false,
            }
        }
        Ok(decidable)
    }

    // ---- outgoing filtering ---------------------------------------------

    /// Filter a committed bundle's actions for one viewer. The actions must
    /// belong to the active, applied bundle (or be a prior output of this
    /// filter for it).
    pub async fn filter_outgoing_doc_actions(
        &self,
        session: &Arc<DocSession>,
        actions: &[DocAction],
    ) -> Result<Vec<DocAction>, GateError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let Some(bundle) = state.bundle.as_ref() else {
            return Err(GateError::BundleState("no active bundle".into()));
        };
        if !bundle.applied {
            return Err(GateError::BundleState("bundle was not applied".into()));
        }
        let steps = self.steps_for(bundle).await?;
        self.check_user_attributes(session, state.prev_user_attributes.as_ref())
            .await?;
        let user = self.get_user(session).await?;

        let mut out = Vec::new();
        let aligned = actions.len() == steps.len()
            && actions
                .iter()
                .zip(steps.iter())
                .all(|(action, step)| action.table_id() == step.action.table_id());
        let mut cursor = 0usize;
        for (index, action) in actions.iter().enumerate() {
            let step_index = if aligned {
                Some(index)
            } else {
                find_step(&steps, &mut cursor, action.table_id())
            };
            let Some(step_index) = step_index else {
                warn!(
                    table_id = action.table_id(),
                    "no step context for action, withholding it"
                );
                continue;
            };
            let step = &steps[step_index];
            let perm_info = step.ruler.permission_info(session_key(session), &user);
            out.extend(self.filter_action_for_step(action, step, &perm_info)?);
        }
        Ok(out)
    }

    /// Censor a structural-table bundle for document open.
    pub async fn filter_meta_tables(
        &self,
        session: &Arc<DocSession>,
        tables: HashMap<String, TableDataAction>,
    ) -> Result<HashMap<String, TableDataAction>, GateError> {
        let perm_info = self.session_perm_info(session).await?;
        let meta: HashMap<String, Arc<TableDataAction>> = tables
            .iter()
            .map(|(id, table)| (id.clone(), Arc::new(table.clone())))
            .collect();
        let censor = CensorshipInfo::new(&meta, &perm_info);
        let mut out = tables;
        for table in out.values_mut() {
            censor.apply_to_table_data(table)?;
        }
        Ok(out)
    }

    /// In-place row and column censoring of a fetched table.
    pub async fn filter_data(
        &self,
        session: &Arc<DocSession>,
        data: &mut TableDataAction,
    ) -> Result<(), GateError> {
        let perm_info = self.session_perm_info(session).await?;
        match perm_info.table_read_disposition(&data.table_id) {
            TableReadDisposition::Deny => data.clear(),
            TableReadDisposition::Allow => {}
            TableReadDisposition::MixedColumns | TableReadDisposition::MixedRows => {
                censor_table_data(data, &perm_info)?;
            }
        }
        if is_structural_table(&data.table_id) {
            let censor = CensorshipInfo::new(&self.live_meta(), &perm_info);
            censor.apply_to_table_data(data)?;
        }
        Ok(())
    }

    /// Blank the bundle summary for viewers who cannot read everything.
    pub async fn filter_action_group(
        &self,
        session: &Arc<DocSession>,
        action_group: ActionGroup,
    ) -> Result<ActionGroup, GateError> {
        if self.can_read_everything(session).await? {
            return Ok(action_group);
        }
        Ok(ActionGroup {
            action_num: action_group.action_num,
            desc: None,
            action_summary: None,
            ret_values: None,
        })
    }

    // ---- internals ------------------------------------------------------

    fn current_ruler(&self) -> Arc<Ruler> {
        self.ruler.read().clone()
    }

    fn live_meta(&self) -> HashMap<String, Arc<TableDataAction>> {
        let doc = self.doc_data.read();
        STRUCTURAL_TABLES
            .iter()
            .filter_map(|table_id| {
                doc.get_table(table_id)
                    .map(|table| (table_id.to_string(), Arc::new(table.clone())))
            })
            .collect()
    }

    async fn get_user_for(
        &self,
        session: &Arc<DocSession>,
        ruler: &Arc<Ruler>,
    ) -> Result<Arc<UserInfo>, GateError> {
        self.resolver
            .get_user(session, ruler.rules(), self.config.recovery_mode)
            .await
    }

    async fn perm_info_for(
        &self,
        session: &Arc<DocSession>,
        ruler: &Arc<Ruler>,
    ) -> Result<Arc<PermissionInfo>, GateError> {
        let user = self.get_user_for(session, ruler).await?;
        Ok(ruler.permission_info(session_key(session), &user))
    }

    async fn session_perm_info(
        &self,
        session: &Arc<DocSession>,
    ) -> Result<Arc<PermissionInfo>, GateError> {
        let ruler = self.current_ruler();
        self.perm_info_for(session, &ruler).await
    }

    async fn steps_for(&self, bundle: &ActionBundle) -> Result<Arc<Vec<ActionStep>>, GateError> {
        let ruler = self.current_ruler();
        bundle
            .steps
            .get_or_try_init(|| async {
                let live_meta = self.live_meta();
                match build_steps(
                    &bundle.doc_actions,
                    &bundle.undo,
                    bundle.applied,
                    self.storage.as_ref(),
                    &live_meta,
                    ruler.clone(),
                    self.compiler.as_ref(),
                )
                .await
                {
                    Ok(steps) => Ok(Arc::new(steps)),
                    Err(err) => {
                        warn!("failed to build bundle steps: {err}");
                        Err(err)
                    }
                }
            })
            .await
            .cloned()
    }

    /// Ingress assertion for one committed-to-be action.
    fn check_incoming_doc_action(
        &self,
        steps: &[ActionStep],
        index: usize,
        perm_info: &PermissionInfo,
    ) -> Result<(), GateError> {
        let step = &steps[index];
        let action = &step.action;
        let check = access_check_for_action(action, Severity::Fatal);
        let table_id = action.table_id();
        if check.axis == AccessAxis::SchemaEdit {
            check.throw_if_not_fully_allowed(&perm_info.get_table_access(table_id))?;
            return Ok(());
        }
        let new_rows = rows_for_new_rec(steps, index, table_id);
        for row_id in action.row_ids().unwrap_or_default() {
            let new_rec = new_rows
                .as_ref()
                .and_then(|rows| RecordView::for_row(rows.clone(), row_id));
            let rec = step
                .rows_before
                .as_ref()
                .and_then(|rows| RecordView::for_row(rows.clone(), row_id))
                // For creations the record is the incoming row itself.
                .or_else(|| new_rec.clone());
            let access =
                perm_info.get_table_access_for_record(table_id, rec.as_ref(), new_rec.as_ref());
            check.throw_if_denied(&access)?;
            for col_id in action.col_ids() {
                if col_id == MANUAL_SORT {
                    continue;
                }
                let access = perm_info.get_column_access_for_record(
                    table_id,
                    col_id,
                    rec.as_ref(),
                    new_rec.as_ref(),
                );
                check.throw_if_denied(&access)?;
            }
        }
        Ok(())
    }

    /// Refuse a commit that would leave the rules un-loadable.
    fn simulate_rule_rebuild(&self, doc_actions: &[DocAction]) -> Result<(), GateError> {
        let mut sandbox = DocData::from_tables(
            self.live_meta().values().map(|table| (**table).clone()),
        );
        for action in doc_actions {
            if is_structural_table(action.table_id()) {
                if let Err(err) = sandbox.receive_action(action) {
                    return Err(GateError::bad_request(format!(
                        "rule change cannot be applied: {err}"
                    )));
                }
            }
        }
        let collection = RuleCollection::build(&sandbox, self.compiler.as_ref());
        if let Some(err) = collection.rule_error() {
            return Err(GateError::bad_request(format!(
                "rule change would break access rules: {err}"
            )));
        }
        collection
            .check_doc_entities(&sandbox)
            .map_err(|err| GateError::bad_request(format!("rule change is inconsistent: {err}")))
    }

    /// Re-evaluate the viewer's user attributes and force a reload on any
    /// divergence.
    async fn check_user_attributes(
        &self,
        session: &Arc<DocSession>,
        prev: Option<&HashMap<SessionKey, Arc<UserAttributes>>>,
    ) -> Result<(), GateError> {
        let Some(prev) = prev else { return Ok(()) };
        let Some(prev_attrs) = prev.get(&session_key(session)) else {
            return Ok(());
        };
        self.get_user(session).await?;
        let fresh = self
            .resolver
            .cached_attributes(session)
            .unwrap_or_default();
        if fresh.rows_fingerprint() != prev_attrs.rows_fingerprint() {
            info!("user attributes changed for a viewer, forcing reload");
            return Err(GateError::NeedReload);
        }
        Ok(())
    }

    async fn filter_for_viewer(
        &self,
        session: &Arc<DocSession>,
        steps: &[ActionStep],
        action_group: &ActionGroup,
        prev_attrs: Option<&HashMap<SessionKey, Arc<UserAttributes>>>,
    ) -> Result<DocUpdateMessage, GateError> {
        self.check_user_attributes(session, prev_attrs).await?;
        let user = self.get_user(session).await?;
        let mut doc_actions = Vec::new();
        for step in steps {
            let perm_info = step.ruler.permission_info(session_key(session), &user);
            doc_actions.extend(self.filter_action_for_step(&step.action, step, &perm_info)?);
        }
        let action_group = self
            .filter_action_group(session, action_group.clone())
            .await?;
        Ok(DocUpdateMessage { action_group, doc_actions })
    }

    /// Dispatch between pass/drop, column pruning and full row filtering,
    /// then run the structural-metadata censor.
    fn filter_action_for_step(
        &self,
        action: &DocAction,
        step: &ActionStep,
        perm_info: &PermissionInfo,
    ) -> Result<Vec<DocAction>, GateError> {
        let table_id = action.table_id();
        let read_check = AccessCheck::read(Severity::Check);
        let mut actions = match perm_info.table_read_disposition(table_id) {
            TableReadDisposition::Deny => {
                debug!(table_id, "withholding action on unreadable table");
                Vec::new()
            }
            TableReadDisposition::Allow => vec![action.clone()],
            TableReadDisposition::MixedColumns => {
                filter_action_columns(action.clone(), perm_info, &read_check)
                    .map_err(GateError::from)?
                    .into_iter()
                    .collect()
            }
            TableReadDisposition::MixedRows => {
                let mut pruned = Vec::new();
                for filtered in filter_row_level(action, step, perm_info)? {
                    if let Some(kept) =
                        filter_action_columns(filtered, perm_info, &read_check)
                            .map_err(GateError::from)?
                    {
                        pruned.push(kept);
                    }
                }
                pruned
            }
        };

        if is_structural_table(table_id) {
            let meta = step
                .meta_after
                .clone()
                .unwrap_or_else(|| self.live_meta());
            let censor = CensorshipInfo::new(&meta, perm_info);
            actions.retain_mut(|action| {
                censor.apply_to_action(action) != CensorOutcome::Suppress
            });
        }
        Ok(actions)
    }
}

/// Locate the step a filtered action belongs to, scanning forward from the
/// cursor and matching on table id.
fn find_step(steps: &[ActionStep], cursor: &mut usize, table_id: &str) -> Option<usize> {
    for index in *cursor..steps.len() {
        if steps[index].action.table_id() == table_id {
            *cursor = index;
            return Some(index);
        }
    }
    for index in 0..*cursor {
        if steps[index].action.table_id() == table_id {
            *cursor = index;
            return Some(index);
        }
    }
    None
}

/// Axis a named data user-action must clear before lowering.
fn data_action_axis(name: &str, table_id: &str) -> AccessAxis {
    if is_meta_table(table_id) {
        return AccessAxis::SchemaEdit;
    }
    match name {
        "UpdateRecord" | "BulkUpdateRecord" => AccessAxis::Update,
        "RemoveRecord" | "BulkRemoveRecord" => AccessAxis::Delete,
        _ => AccessAxis::Create,
    }
}

/// Impersonation problems surface as denials at ingress.
fn denial_for_ingress(err: GateError) -> GateError {
    match err {
        GateError::AuthNoOwner => GateError::AclDeny { memos: Vec::new() },
        other => other,
    }
}

/// Censor a whole-table payload cell by cell, removing rows the viewer may
/// not read at all.
fn censor_table_data(
    data: &mut TableDataAction,
    perm_info: &PermissionInfo,
) -> Result<(), GateError> {
    let snapshot = Arc::new(data.clone());
    let mut keep = std::collections::HashSet::new();
    for row_id in &snapshot.row_ids {
        if let Some(rec) = RecordView::for_row(snapshot.clone(), *row_id) {
            let access =
                perm_info.get_table_access_for_record(&snapshot.table_id, Some(&rec), None);
            if access.perms.read != PermValue::Deny {
                keep.insert(*row_id);
            }
        }
    }
    data.retain_rows(&keep);

    let snapshot = Arc::new(data.clone());
    let col_ids: Vec<String> = snapshot.columns.keys().cloned().collect();
    for row_id in snapshot.row_ids.iter().copied() {
        let rec = match RecordView::for_row(snapshot.clone(), row_id) {
            Some(rec) => rec,
            None => continue,
        };
        let mut denied: Vec<&String> = Vec::new();
        for col_id in &col_ids {
            if col_id == MANUAL_SORT {
                continue;
            }
            let access = perm_info.get_column_access_for_record(
                &snapshot.table_id,
                col_id,
                Some(&rec),
                None,
            );
            if access.perms.read == PermValue::Deny {
                denied.push(col_id);
            }
        }
        if denied.is_empty() {
            continue;
        }
        let mut editor = RecordEditor::new(data, row_id)?;
        for col_id in denied {
            editor.set(col_id, doc_model::censored())?;
        }
    }
    Ok(())
}
