//! End-to-end scenarios: one bundle through the whole state machine, checked
//! against what each subscriber actually receives.

mod support;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use access_gate::{GateError, NEED_RELOAD};
use doc_model::meta::{
    ACL_RESOURCES_TABLE, ACL_RULES_TABLE, COLUMNS_TABLE, FIELDS_TABLE, SECTIONS_TABLE,
    TABLES_TABLE, VIEWS_TABLE,
};
use doc_model::{DocAction, DocData, TableDataAction, UserAction};
use serde_json::{json, Value};
use support::{
    editor_session, owner_session, viewer_session, Fixture, RuleSpec,
};

fn non_owner_rule(resource: i64, permissions: &'static str, memo: &'static str) -> RuleSpec {
    RuleSpec {
        id: 100 + resource,
        resource,
        formula: "user.Access != \"owners\"",
        permissions,
        memo,
    }
}

#[tokio::test]
async fn deny_read_column_is_pruned_for_non_owners() {
    let fixture = Fixture::new(
        vec![(1, "T", "secret")],
        vec![non_owner_rule(1, "-R", "secret stays hidden")],
    );
    let owner = owner_session();
    let editor = editor_session();
    let owner_sub = fixture.subscribe(&owner);
    let editor_sub = fixture.subscribe(&editor);

    let action = DocAction::BulkAddRecord {
        table_id: "T".into(),
        row_ids: vec![1, 2],
        columns: BTreeMap::from([
            ("public".to_string(), vec![json!("a"), json!("b")]),
            ("secret".to_string(), vec![json!("x"), json!("y")]),
        ]),
    };
    let undo = DocAction::BulkRemoveRecord { table_id: "T".into(), row_ids: vec![1, 2] };
    fixture
        .commit(
            &owner,
            vec![UserAction::new("BulkAddRecord", vec![json!("T")])],
            vec![action.clone()],
            vec![undo],
        )
        .await
        .unwrap();

    let owner_updates = owner_sub.updates();
    assert_eq!(owner_updates.len(), 1);
    assert_eq!(owner_updates[0].doc_actions, vec![action]);

    let editor_updates = editor_sub.updates();
    assert_eq!(editor_updates.len(), 1);
    assert_eq!(
        editor_updates[0].doc_actions,
        vec![DocAction::BulkAddRecord {
            table_id: "T".into(),
            row_ids: vec![1, 2],
            columns: BTreeMap::from([(
                "public".to_string(),
                vec![json!("a"), json!("b")]
            )]),
        }]
    );
}

fn open_rows_only_fixture() -> Fixture {
    Fixture::new(
        vec![(1, "T", "*")],
        vec![
            RuleSpec {
                id: 10,
                resource: 1,
                formula: "rec.status == \"open\"",
                permissions: "+R",
                memo: "",
            },
            non_owner_rule(1, "-R", "open rows only"),
        ],
    )
}

#[tokio::test]
async fn row_becoming_visible_arrives_as_a_full_add() {
    let fixture = open_rows_only_fixture();
    fixture.seed_rows(
        "T",
        vec![5],
        vec![("status", vec![json!("draft")]), ("note", vec![json!("old")])],
    );
    let owner = owner_session();
    let viewer = viewer_session();
    let viewer_sub = fixture.subscribe(&viewer);

    fixture
        .commit(
            &owner,
            vec![UserAction::new("UpdateRecord", vec![json!("T")])],
            vec![DocAction::UpdateRecord {
                table_id: "T".into(),
                row_id: 5,
                columns: BTreeMap::from([
                    ("status".to_string(), json!("open")),
                    ("note".to_string(), json!("ok")),
                ]),
            }],
            vec![DocAction::UpdateRecord {
                table_id: "T".into(),
                row_id: 5,
                columns: BTreeMap::from([
                    ("status".to_string(), json!("draft")),
                    ("note".to_string(), json!("old")),
                ]),
            }],
        )
        .await
        .unwrap();

    let updates = viewer_sub.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].doc_actions.len(), 1);
    match &updates[0].doc_actions[0] {
        DocAction::BulkAddRecord { table_id, row_ids, columns } => {
            assert_eq!(table_id, "T");
            assert_eq!(row_ids, &vec![5]);
            // The synthetic add carries the full post-state row.
            assert_eq!(columns["status"], vec![json!("open")]);
            assert_eq!(columns["note"], vec![json!("ok")]);
        }
        other => panic!("expected a synthetic add, got {other:?}"),
    }
}

#[tokio::test]
async fn row_becoming_hidden_arrives_as_a_removal() {
    let fixture = open_rows_only_fixture();
    fixture.seed_rows(
        "T",
        vec![7],
        vec![("status", vec![json!("open")]), ("note", vec![json!("keep")])],
    );
    let owner = owner_session();
    let viewer = viewer_session();
    let owner_sub = fixture.subscribe(&owner);
    let viewer_sub = fixture.subscribe(&viewer);

    let update = DocAction::UpdateRecord {
        table_id: "T".into(),
        row_id: 7,
        columns: BTreeMap::from([("status".to_string(), json!("archived"))]),
    };
    fixture
        .commit(
            &owner,
            vec![UserAction::new("UpdateRecord", vec![json!("T")])],
            vec![update.clone()],
            vec![DocAction::UpdateRecord {
                table_id: "T".into(),
                row_id: 7,
                columns: BTreeMap::from([("status".to_string(), json!("open"))]),
            }],
        )
        .await
        .unwrap();

    assert_eq!(
        viewer_sub.updates()[0].doc_actions,
        vec![DocAction::BulkRemoveRecord { table_id: "T".into(), row_ids: vec![7] }]
    );
    // The owner still sees the plain update.
    assert_eq!(owner_sub.updates()[0].doc_actions, vec![update]);
}

#[tokio::test]
async fn rule_edit_bundle_reloads_every_subscriber() {
    let fixture = Fixture::new(vec![(1, "T", "*")], vec![]);
    let owner = owner_session();
    let editor = editor_session();
    let owner_sub = fixture.subscribe(&owner);
    let editor_sub = fixture.subscribe(&editor);

    fixture
        .commit(
            &owner,
            vec![UserAction::new(
                "AddRecord",
                vec![json!(ACL_RULES_TABLE), json!(50), json!({"resource": 1})],
            )],
            vec![DocAction::AddRecord {
                table_id: ACL_RULES_TABLE.into(),
                row_id: 50,
                columns: BTreeMap::from([
                    ("resource".to_string(), json!(1)),
                    ("aclFormula".to_string(), json!("")),
                    ("permissionsText".to_string(), json!("+R")),
                    ("rulePos".to_string(), json!(1.0)),
                    ("memo".to_string(), json!("")),
                    ("userAttributes".to_string(), json!("")),
                ]),
            }],
            vec![DocAction::RemoveRecord { table_id: ACL_RULES_TABLE.into(), row_id: 50 }],
        )
        .await
        .unwrap();

    for subscriber in [&owner_sub, &editor_sub] {
        assert!(subscriber.updates().is_empty());
        assert_eq!(subscriber.errors(), vec![NEED_RELOAD.to_string()]);
    }
}

#[tokio::test]
async fn rule_edit_by_non_owner_is_denied() {
    let fixture = Fixture::new(vec![(1, "T", "*")], vec![]);
    let editor = editor_session();
    let err = fixture
        .commit(
            &editor,
            vec![UserAction::new(
                "UpdateRecord",
                vec![json!(ACL_RULES_TABLE), json!(1), json!({})],
            )],
            vec![],
            vec![],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::AclDeny { .. }));

    // The failed bundle is gone: a new one can begin.
    fixture
        .commit(&editor, vec![UserAction::new("Calculate", vec![])], vec![], vec![])
        .await
        .unwrap();
}

#[tokio::test]
async fn broken_rule_change_is_rejected_with_bad_request() {
    let fixture = Fixture::new(vec![(1, "T", "*")], vec![]);
    let owner = owner_session();
    // The new resource references a column that does not exist.
    let err = fixture
        .commit(
            &owner,
            vec![UserAction::new(
                "AddRecord",
                vec![json!(ACL_RESOURCES_TABLE), json!(9), json!({})],
            )],
            vec![
                DocAction::AddRecord {
                    table_id: ACL_RESOURCES_TABLE.into(),
                    row_id: 9,
                    columns: BTreeMap::from([
                        ("tableId".to_string(), json!("T")),
                        ("colIds".to_string(), json!("no_such_column")),
                    ]),
                },
                DocAction::AddRecord {
                    table_id: ACL_RULES_TABLE.into(),
                    row_id: 60,
                    columns: BTreeMap::from([
                        ("resource".to_string(), json!(9)),
                        ("aclFormula".to_string(), json!("")),
                        ("permissionsText".to_string(), json!("-R")),
                        ("rulePos".to_string(), json!(1.0)),
                        ("memo".to_string(), json!("")),
                        ("userAttributes".to_string(), json!("")),
                    ]),
                },
            ],
            vec![],
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn impersonation_is_owner_only() {
    let users = HashMap::from([(
        42,
        access_gate::UserProfile {
            id: 42,
            email: "imp@example.com".to_string(),
            name: "Imp Personated".to_string(),
            access: Some(rule_center::Role::Viewer),
        },
    )]);
    let fixture = Fixture::with_users(
        vec![(1, "T", "*")],
        vec![non_owner_rule(1, "-U", "read only here")],
        users,
    );

    let mut owner = access_gate::DocSession::new(
        Some(rule_center::Role::Owner),
        1,
        "owner@example.com",
        "Olive Owner",
    );
    owner
        .link_parameters
        .insert("aclAsUserId".to_string(), "42".to_string());
    let owner = Arc::new(owner);

    let user = fixture.gate.get_user(&owner).await.unwrap();
    assert_eq!(user.user_id, 42);
    assert_eq!(user.email, "imp@example.com");
    assert_eq!(user.access, Some(rule_center::Role::Viewer));
    let over = fixture.gate.get_user_override(&owner).await.unwrap().unwrap();
    assert_eq!(over.user_id, 42);

    let mut editor = access_gate::DocSession::new(
        Some(rule_center::Role::Editor),
        2,
        "editor@example.com",
        "Ed Editor",
    );
    editor
        .link_parameters
        .insert("aclAsUserId".to_string(), "42".to_string());
    let editor = Arc::new(editor);

    assert!(matches!(
        fixture.gate.get_user(&editor).await.unwrap_err(),
        GateError::AuthNoOwner
    ));
    let err = fixture
        .gate
        .assert_can_maybe_apply_user_actions(
            &editor,
            &[UserAction::new("UpdateRecord", vec![json!("T"), json!(1), json!({})])],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::AclDeny { .. }));
}

fn two_table_meta_fixture() -> Fixture {
    let mut doc = DocData::new();
    doc.sync_table(TableDataAction::with_columns(
        "A",
        vec![1],
        [("x".to_string(), vec![json!("ax")])],
    ));
    doc.sync_table(TableDataAction::with_columns(
        "B",
        vec![1],
        [("y".to_string(), vec![json!("by")])],
    ));
    doc.sync_table(TableDataAction::with_columns(
        TABLES_TABLE,
        vec![1, 2],
        [("tableId".to_string(), vec![json!("A"), json!("B")])],
    ));
    doc.sync_table(TableDataAction::with_columns(
        COLUMNS_TABLE,
        vec![1, 2],
        [
            ("parentId".to_string(), vec![json!(1), json!(2)]),
            ("colId".to_string(), vec![json!("x"), json!("y")]),
            ("label".to_string(), vec![json!("X"), json!("Y")]),
            ("type".to_string(), vec![json!("Text"), json!("Text")]),
            ("widgetOptions".to_string(), vec![json!(""), json!("wide")]),
            ("formula".to_string(), vec![json!(""), json!("")]),
        ],
    ));
    doc.sync_table(TableDataAction::with_columns(
        VIEWS_TABLE,
        vec![1],
        [("name".to_string(), vec![json!("Main")])],
    ));
    doc.sync_table(TableDataAction::with_columns(
        SECTIONS_TABLE,
        vec![1, 2],
        [
            ("parentId".to_string(), vec![json!(1), json!(1)]),
            ("tableRef".to_string(), vec![json!(2), json!(1)]),
            ("title".to_string(), vec![json!("B section"), json!("A section")]),
        ],
    ));
    doc.sync_table(TableDataAction::with_columns(
        FIELDS_TABLE,
        vec![1, 2],
        [
            ("parentId".to_string(), vec![json!(1), json!(2)]),
            ("colRef".to_string(), vec![json!(2), json!(1)]),
            ("widgetOptions".to_string(), vec![json!("w"), json!("v")]),
            ("filter".to_string(), vec![json!("f"), json!("")]),
        ],
    ));
    doc.sync_table(TableDataAction::with_columns(
        ACL_RESOURCES_TABLE,
        vec![1],
        [
            ("tableId".to_string(), vec![json!("B")]),
            ("colIds".to_string(), vec![json!("*")]),
        ],
    ));
    doc.sync_table(TableDataAction::with_columns(
        ACL_RULES_TABLE,
        vec![10],
        [
            ("resource".to_string(), vec![json!(1)]),
            ("aclFormula".to_string(), vec![json!("user.Access != \"owners\"")]),
            ("permissionsText".to_string(), vec![json!("-R")]),
            ("rulePos".to_string(), vec![json!(1.0)]),
            ("memo".to_string(), vec![json!("")]),
            ("userAttributes".to_string(), vec![json!("")]),
        ],
    ));
    Fixture::from_doc(doc, HashMap::new())
}

#[tokio::test]
async fn structural_censorship_blanks_everything_reachable_from_a_hidden_table() {
    let fixture = two_table_meta_fixture();
    let viewer = viewer_session();

    let meta: HashMap<String, TableDataAction> = {
        let doc = fixture.doc_data.read();
        [
            TABLES_TABLE,
            COLUMNS_TABLE,
            VIEWS_TABLE,
            SECTIONS_TABLE,
            FIELDS_TABLE,
            ACL_RESOURCES_TABLE,
            ACL_RULES_TABLE,
        ]
        .iter()
        .map(|id| (id.to_string(), doc.get_table(id).unwrap().clone()))
        .collect()
    };
    let filtered = fixture.gate.filter_meta_tables(&viewer, meta.clone()).await.unwrap();

    let tables = &filtered[TABLES_TABLE];
    assert_eq!(tables.columns["tableId"], vec![json!("A"), json!("")]);

    let columns = &filtered[COLUMNS_TABLE];
    assert_eq!(columns.columns["colId"], vec![json!("x"), json!("")]);
    assert_eq!(columns.columns["type"], vec![json!("Text"), json!("Any")]);
    assert_eq!(columns.columns["parentId"], vec![json!(1), json!(0)]);

    let sections = &filtered[SECTIONS_TABLE];
    assert_eq!(
        sections.columns["title"],
        vec![json!(""), json!("A section")]
    );
    assert_eq!(sections.columns["tableRef"], vec![json!(0), json!(1)]);

    // The parent view shows a censored section, so its name goes too.
    assert_eq!(filtered[VIEWS_TABLE].columns["name"], vec![json!("")]);

    let fields = &filtered[FIELDS_TABLE];
    assert_eq!(fields.columns["widgetOptions"], vec![json!(""), json!("v")]);
    assert_eq!(fields.columns["parentId"], vec![json!(0), json!(2)]);

    // Rule tables are suppressed entirely for viewers without the
    // access-rules permission.
    assert!(filtered[ACL_RULES_TABLE].row_ids.is_empty());
    assert!(filtered[ACL_RESOURCES_TABLE].row_ids.is_empty());

    // The owner sees the original payloads.
    let owner = owner_session();
    let unfiltered = fixture.gate.filter_meta_tables(&owner, meta.clone()).await.unwrap();
    assert_eq!(unfiltered[TABLES_TABLE], meta[TABLES_TABLE]);
    assert_eq!(unfiltered[ACL_RULES_TABLE], meta[ACL_RULES_TABLE]);
}

#[tokio::test]
async fn filter_data_hides_rows_and_censors_cells() {
    let fixture = Fixture::new(
        vec![(1, "T", "*"), (2, "T", "secret")],
        vec![
            RuleSpec {
                id: 10,
                resource: 1,
                formula: "rec.status == \"open\"",
                permissions: "+R",
                memo: "",
            },
            non_owner_rule(1, "-R", ""),
            non_owner_rule(2, "-R", ""),
        ],
    );
    let viewer = viewer_session();
    let mut data = TableDataAction::with_columns(
        "T",
        vec![1, 2],
        [
            ("status".to_string(), vec![json!("open"), json!("draft")]),
            ("secret".to_string(), vec![json!("s1"), json!("s2")]),
            ("note".to_string(), vec![json!("n1"), json!("n2")]),
        ],
    );
    fixture.gate.filter_data(&viewer, &mut data).await.unwrap();
    assert_eq!(data.row_ids, vec![1]);
    assert_eq!(data.columns["note"], vec![json!("n1")]);
    assert_eq!(data.columns["secret"], vec![Value::String("CENSORED".into())]);
}
