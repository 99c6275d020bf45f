//! Shared fixtures: an in-memory document store, a stub home database, a
//! recording broadcaster, and a small equality-only formula compiler.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use access_gate::{
    AccessGate, ActionGroup, Broadcaster, DocSession, DocUpdateMessage, GateConfig, GateError,
    HomeDb, Subscriber, UserProfile,
};
use async_trait::async_trait;
use doc_model::meta::{
    ACL_RESOURCES_TABLE, ACL_RULES_TABLE, COLUMNS_TABLE, FIELDS_TABLE, SECTIONS_TABLE,
    TABLES_TABLE, VIEWS_TABLE,
};
use doc_model::{
    CellValue, DocAction, DocData, DocError, DocStorage, Query, RowId, TableDataAction,
    UserAction,
};
use parking_lot::{Mutex, RwLock};
use rule_center::{CompiledFormula, EvalContext, FormulaCompiler, Role, RuleError};
use serde_json::{json, Value};

/// Formula compiler for tests: empty text, `True`, `False`, and
/// `<path> == <json>` / `<path> != <json>` where the path starts with
/// `rec.`, `newRec.` or `user.`.
pub struct EqCompiler;

impl FormulaCompiler for EqCompiler {
    fn compile(&self, text: &str) -> Result<CompiledFormula, RuleError> {
        let trimmed = text.trim().to_string();
        if trimmed.is_empty() || trimmed == "True" {
            return Ok(CompiledFormula::always_true());
        }
        if trimmed == "False" {
            return Ok(CompiledFormula::new(trimmed, false, Arc::new(|_| Ok(false))));
        }
        let (lhs, rhs, negate) = if let Some((l, r)) = trimmed.split_once("!=") {
            (l.trim().to_string(), r.trim().to_string(), true)
        } else if let Some((l, r)) = trimmed.split_once("==") {
            (l.trim().to_string(), r.trim().to_string(), false)
        } else {
            return Err(RuleError::Compile(format!("unsupported formula: {text}")));
        };
        let expected: Value = serde_json::from_str(&rhs)
            .map_err(|e| RuleError::Compile(format!("bad literal in {text}: {e}")))?;
        let uses_rec = lhs.starts_with("rec.") || lhs.starts_with("newRec.");
        Ok(CompiledFormula::new(
            trimmed.clone(),
            uses_rec,
            Arc::new(move |ctx: &EvalContext<'_>| {
                let actual = if let Some(col) = lhs.strip_prefix("rec.") {
                    ctx.rec.map(|r| r.get(col)).unwrap_or(Value::Null)
                } else if let Some(col) = lhs.strip_prefix("newRec.") {
                    ctx.new_rec.map(|r| r.get(col)).unwrap_or(Value::Null)
                } else if let Some(path) = lhs.strip_prefix("user.") {
                    ctx.user.get_path(path)
                } else {
                    Value::Null
                };
                Ok((actual == expected) != negate)
            }),
        ))
    }
}

/// Document storage backed by the live snapshot.
pub struct MemStorage {
    doc_data: Arc<RwLock<DocData>>,
}

#[async_trait]
impl DocStorage for MemStorage {
    async fn fetch_query(&self, query: &Query) -> Result<TableDataAction, DocError> {
        let doc = self.doc_data.read();
        let table = doc
            .get_table(&query.table_id)
            .ok_or_else(|| DocError::TableNotFound(query.table_id.clone()))?;
        let keep: Vec<RowId> = table
            .row_ids
            .iter()
            .copied()
            .filter(|row_id| {
                query.filters.iter().all(|(col, values)| {
                    let actual = if col == "id" {
                        json!(*row_id)
                    } else {
                        table
                            .index_of(*row_id)
                            .and_then(|i| table.cell(col, i).cloned())
                            .unwrap_or(Value::Null)
                    };
                    values.contains(&actual)
                })
            })
            .collect();
        Ok(table.take_rows(&keep))
    }
}

pub struct MemHomeDb {
    pub users: HashMap<i64, UserProfile>,
}

#[async_trait]
impl HomeDb for MemHomeDb {
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserProfile>, GateError> {
        Ok(self.users.get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserProfile>, GateError> {
        Ok(self
            .users
            .values()
            .find(|profile| profile.email == email)
            .cloned())
    }
}

#[derive(Debug, Clone)]
pub enum Delivery {
    Update(DocUpdateMessage),
    Error(String),
}

pub struct TestSubscriber {
    session: Arc<DocSession>,
    pub deliveries: Mutex<Vec<Delivery>>,
}

impl TestSubscriber {
    pub fn new(session: Arc<DocSession>) -> Arc<Self> {
        Arc::new(Self { session, deliveries: Mutex::new(Vec::new()) })
    }

    pub fn updates(&self) -> Vec<DocUpdateMessage> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Update(message) => Some(message.clone()),
                Delivery::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Error(code) => Some(code.clone()),
                Delivery::Update(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Subscriber for TestSubscriber {
    fn session(&self) -> Arc<DocSession> {
        self.session.clone()
    }

    async fn send_update(&self, message: DocUpdateMessage) -> Result<(), GateError> {
        self.deliveries.lock().push(Delivery::Update(message));
        Ok(())
    }

    async fn send_error(&self, code: &'static str) -> Result<(), GateError> {
        self.deliveries.lock().push(Delivery::Error(code.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct TestBroadcaster {
    pub subscribers: Mutex<Vec<Arc<TestSubscriber>>>,
}

impl Broadcaster for TestBroadcaster {
    fn subscribers(&self) -> Vec<Arc<dyn Subscriber>> {
        self.subscribers
            .lock()
            .iter()
            .map(|s| s.clone() as Arc<dyn Subscriber>)
            .collect()
    }
}

/// One access rule row for fixture construction.
pub struct RuleSpec {
    pub id: RowId,
    pub resource: RowId,
    pub formula: &'static str,
    pub permissions: &'static str,
    pub memo: &'static str,
}

pub struct Fixture {
    pub doc_data: Arc<RwLock<DocData>>,
    pub gate: Arc<AccessGate>,
    pub broadcaster: Arc<TestBroadcaster>,
}

impl Fixture {
    /// Document with one user table `T` (columns `public`, `secret`,
    /// `status`, `note`, `manualSort`), structural metadata describing it,
    /// and the given access rules.
    pub fn new(resources: Vec<(RowId, &str, &str)>, rules: Vec<RuleSpec>) -> Fixture {
        Self::with_users(resources, rules, HashMap::new())
    }

    pub fn with_users(
        resources: Vec<(RowId, &str, &str)>,
        rules: Vec<RuleSpec>,
        users: HashMap<i64, UserProfile>,
    ) -> Fixture {
        let mut doc = DocData::new();
        doc.sync_table(TableDataAction::with_columns(
            "T",
            vec![],
            [
                ("public".to_string(), vec![]),
                ("secret".to_string(), vec![]),
                ("status".to_string(), vec![]),
                ("note".to_string(), vec![]),
                ("manualSort".to_string(), vec![]),
            ],
        ));
        doc.sync_table(TableDataAction::with_columns(
            TABLES_TABLE,
            vec![1],
            [("tableId".to_string(), vec![json!("T")])],
        ));
        doc.sync_table(TableDataAction::with_columns(
            COLUMNS_TABLE,
            vec![1, 2, 3, 4, 5],
            [
                (
                    "parentId".to_string(),
                    vec![json!(1), json!(1), json!(1), json!(1), json!(1)],
                ),
                (
                    "colId".to_string(),
                    vec![
                        json!("public"),
                        json!("secret"),
                        json!("status"),
                        json!("note"),
                        json!("manualSort"),
                    ],
                ),
                (
                    "label".to_string(),
                    vec![
                        json!("Public"),
                        json!("Secret"),
                        json!("Status"),
                        json!("Note"),
                        json!(""),
                    ],
                ),
                (
                    "type".to_string(),
                    vec![
                        json!("Text"),
                        json!("Text"),
                        json!("Text"),
                        json!("Text"),
                        json!("ManualSortPos"),
                    ],
                ),
            ],
        ));
        doc.sync_table(TableDataAction::with_columns(VIEWS_TABLE, vec![], [("name".to_string(), vec![])]));
        doc.sync_table(TableDataAction::with_columns(
            SECTIONS_TABLE,
            vec![],
            [
                ("parentId".to_string(), vec![]),
                ("tableRef".to_string(), vec![]),
                ("title".to_string(), vec![]),
            ],
        ));
        doc.sync_table(TableDataAction::with_columns(
            FIELDS_TABLE,
            vec![],
            [
                ("parentId".to_string(), vec![]),
                ("colRef".to_string(), vec![]),
                ("widgetOptions".to_string(), vec![]),
                ("filter".to_string(), vec![]),
            ],
        ));

        let mut table_ids = Vec::new();
        let mut col_ids = Vec::new();
        let mut resource_rows = Vec::new();
        for (row_id, table_id, cols) in &resources {
            resource_rows.push(*row_id);
            table_ids.push(json!(table_id));
            col_ids.push(json!(cols));
        }
        doc.sync_table(TableDataAction::with_columns(
            ACL_RESOURCES_TABLE,
            resource_rows,
            [
                ("tableId".to_string(), table_ids),
                ("colIds".to_string(), col_ids),
            ],
        ));

        let mut rule_rows = Vec::new();
        let mut resource_refs = Vec::new();
        let mut formulas = Vec::new();
        let mut permissions = Vec::new();
        let mut positions = Vec::new();
        let mut memos = Vec::new();
        let mut user_attributes = Vec::new();
        for (position, rule) in rules.iter().enumerate() {
            rule_rows.push(rule.id);
            resource_refs.push(json!(rule.resource));
            formulas.push(json!(rule.formula));
            permissions.push(json!(rule.permissions));
            positions.push(json!(position as f64));
            memos.push(json!(rule.memo));
            user_attributes.push(json!(""));
        }
        doc.sync_table(TableDataAction::with_columns(
            ACL_RULES_TABLE,
            rule_rows,
            [
                ("resource".to_string(), resource_refs),
                ("aclFormula".to_string(), formulas),
                ("permissionsText".to_string(), permissions),
                ("rulePos".to_string(), positions),
                ("memo".to_string(), memos),
                ("userAttributes".to_string(), user_attributes),
            ],
        ));

        Self::from_doc(doc, users)
    }

    pub fn from_doc(doc: DocData, users: HashMap<i64, UserProfile>) -> Fixture {
        let doc_data = Arc::new(RwLock::new(doc));
        let storage = Arc::new(MemStorage { doc_data: doc_data.clone() });
        let broadcaster = Arc::new(TestBroadcaster::default());
        let gate = Arc::new(AccessGate::new(
            doc_data.clone(),
            storage,
            Arc::new(MemHomeDb { users }),
            broadcaster.clone(),
            Arc::new(EqCompiler),
            GateConfig::default(),
        ));
        Fixture { doc_data, gate, broadcaster }
    }

    pub fn subscribe(&self, session: &Arc<DocSession>) -> Arc<TestSubscriber> {
        let subscriber = TestSubscriber::new(session.clone());
        self.broadcaster.subscribers.lock().push(subscriber.clone());
        subscriber
    }

    pub fn seed_rows(&self, table_id: &str, row_ids: Vec<RowId>, columns: Vec<(&str, Vec<Value>)>) {
        let mut doc = self.doc_data.write();
        let mut table = doc.get_table(table_id).cloned().unwrap_or_else(|| {
            TableDataAction::new(table_id.to_string())
        });
        for row_id in &row_ids {
            assert!(table.index_of(*row_id).is_none(), "row already seeded");
        }
        for (index, row_id) in row_ids.iter().enumerate() {
            let cells: BTreeMap<String, CellValue> = columns
                .iter()
                .map(|(col, values)| (col.to_string(), values[index].clone()))
                .collect();
            table.append_row(*row_id, &cells);
        }
        doc.sync_table(table);
    }

    /// Run a bundle through the whole state machine, applying the actions to
    /// the live snapshot between verification and `applied_bundle`.
    pub async fn commit(
        &self,
        session: &Arc<DocSession>,
        user_actions: Vec<UserAction>,
        doc_actions: Vec<DocAction>,
        undo: Vec<DocAction>,
    ) -> Result<(), GateError> {
        self.commit_with(session, user_actions, doc_actions, undo, true)
            .await
    }

    /// Like `commit` but leaves the bundle applied and unfinished, so tests
    /// can poke at the outgoing filter directly.
    pub async fn commit_unfinished(
        &self,
        session: &Arc<DocSession>,
        user_actions: Vec<UserAction>,
        doc_actions: Vec<DocAction>,
        undo: Vec<DocAction>,
    ) -> Result<(), GateError> {
        self.commit_with(session, user_actions, doc_actions, undo, false)
            .await
    }

    async fn commit_with(
        &self,
        session: &Arc<DocSession>,
        user_actions: Vec<UserAction>,
        doc_actions: Vec<DocAction>,
        undo: Vec<DocAction>,
        finish: bool,
    ) -> Result<(), GateError> {
        self.gate
            .begin(session.clone(), user_actions, doc_actions.clone(), undo)
            .await?;
        if let Err(err) = self.gate.can_apply_bundle().await {
            self.gate.finished_bundle().await.expect("finish after failure");
            return Err(err);
        }
        {
            let mut doc = self.doc_data.write();
            for action in &doc_actions {
                doc.receive_action(action).expect("apply committed action");
            }
        }
        self.gate.applied_bundle().await?;
        self.gate
            .send_doc_update_for_bundle(ActionGroup {
                action_num: 1,
                desc: Some("change".into()),
                action_summary: Some(json!({"tables": []})),
                ret_values: None,
            })
            .await?;
        if finish {
            self.gate.finished_bundle().await?;
        }
        Ok(())
    }
}

pub fn owner_session() -> Arc<DocSession> {
    Arc::new(DocSession::new(Some(Role::Owner), 1, "owner@example.com", "Olive Owner"))
}

pub fn editor_session() -> Arc<DocSession> {
    Arc::new(DocSession::new(Some(Role::Editor), 2, "editor@example.com", "Ed Editor"))
}

pub fn viewer_session() -> Arc<DocSession> {
    Arc::new(DocSession::new(Some(Role::Viewer), 3, "viewer@example.com", "Vic Viewer"))
}
