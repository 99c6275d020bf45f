//! The resolved identity rules are evaluated against.

use std::collections::BTreeMap;

use doc_model::{CellValue, RecordView};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::perms::{PermValue, PermissionSet};

/// Base document role from the host's authorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owners",
            Role::Editor => "editors",
            Role::Viewer => "viewers",
        }
    }

    pub fn parse(text: &str) -> Option<Role> {
        match text {
            "owners" => Some(Role::Owner),
            "editors" => Some(Role::Editor),
            "viewers" => Some(Role::Viewer),
            _ => None,
        }
    }
}

/// Built-in field names; user-attribute rules may not shadow them.
pub const BUILTIN_USER_FIELDS: &[&str] =
    &["Access", "UserID", "Email", "Name", "LinkKey", "Origin"];

/// The identity a session resolves to, including dynamic fields attached by
/// user-attribute rules.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub access: Option<Role>,
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub link_key: BTreeMap<String, String>,
    pub origin: Option<String>,
    pub attributes: BTreeMap<String, RecordView>,
}

impl UserInfo {
    pub fn new(access: Option<Role>, user_id: i64, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            access,
            user_id,
            email: email.into(),
            name: name.into(),
            link_key: BTreeMap::new(),
            origin: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn is_owner(&self) -> bool {
        self.access == Some(Role::Owner)
    }

    /// Resolve a dotted path such as `Email` or `Team.id`. An optional
    /// leading `user.` segment is accepted. Missing segments resolve to null.
    pub fn get_path(&self, path: &str) -> CellValue {
        let mut segments = path.split('.').peekable();
        if segments.peek() == Some(&"user") {
            segments.next();
        }
        let first = match segments.next() {
            Some(seg) => seg,
            None => return Value::Null,
        };
        let mut current = self.top_level(first);
        for segment in segments {
            current = match current {
                PathValue::Record(view) => PathValue::Cell(view.get(segment)),
                PathValue::Cell(Value::Object(map)) => {
                    PathValue::Cell(map.get(segment).cloned().unwrap_or(Value::Null))
                }
                _ => PathValue::Cell(Value::Null),
            };
        }
        match current {
            PathValue::Cell(value) => value,
            PathValue::Record(view) => view.to_json(),
        }
    }

    fn top_level(&self, field: &str) -> PathValue {
        match field {
            "Access" => PathValue::Cell(
                self.access
                    .map(|r| Value::from(r.as_str()))
                    .unwrap_or(Value::Null),
            ),
            "UserID" => PathValue::Cell(Value::from(self.user_id)),
            "Email" => PathValue::Cell(Value::from(self.email.as_str())),
            "Name" => PathValue::Cell(Value::from(self.name.as_str())),
            "Origin" => PathValue::Cell(
                self.origin
                    .as_deref()
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            ),
            "LinkKey" => PathValue::Cell(Value::Object(
                self.link_key
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                    .collect(),
            )),
            name => match self.attributes.get(name) {
                Some(view) => PathValue::Record(view.clone()),
                None => PathValue::Cell(Value::Null),
            },
        }
    }

    /// Axis verdicts when no rule decides: owners get everything, editors
    /// everything but are still subject to rules, viewers read only.
    pub fn default_permissions(&self) -> PermissionSet {
        match self.access {
            Some(Role::Owner) | Some(Role::Editor) => PermissionSet::uniform(PermValue::Allow),
            Some(Role::Viewer) => {
                let mut ps = PermissionSet::uniform(PermValue::Deny);
                ps.read = PermValue::Allow;
                ps
            }
            None => PermissionSet::uniform(PermValue::Deny),
        }
    }
}

enum PathValue {
    Cell(CellValue),
    Record(RecordView),
}
