//! Resolution of a session into the identity rules are evaluated against:
//! base role, optional impersonation, and user-attribute lookups.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use doc_model::{DocStorage, Query, RecordView, TableDataAction};
use rule_center::user::BUILTIN_USER_FIELDS;
use rule_center::{Role, RuleCollection, UserInfo};
use tracing::warn;

use crate::errors::GateError;
use crate::session::{
    DocSession, SessionCache, UserAttributes, UserOverride, ACL_AS_USER, ACL_AS_USER_ID,
};

/// A user row in the home database.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub name: String,
    /// The profile's access to this document.
    pub access: Option<Role>,
}

/// The home database, used only to resolve impersonation identities.
#[async_trait]
pub trait HomeDb: Send + Sync {
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserProfile>, GateError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserProfile>, GateError>;
}

pub struct UserResolver {
    storage: Arc<dyn DocStorage>,
    home_db: Arc<dyn HomeDb>,
    attributes: SessionCache<Arc<UserAttributes>>,
}

impl UserResolver {
    pub fn new(storage: Arc<dyn DocStorage>, home_db: Arc<dyn HomeDb>) -> Self {
        Self { storage, home_db, attributes: SessionCache::new() }
    }

    pub fn attributes_cache(&self) -> &SessionCache<Arc<UserAttributes>> {
        &self.attributes
    }

    pub fn cached_attributes(&self, session: &Arc<DocSession>) -> Option<Arc<UserAttributes>> {
        self.attributes.get(session)
    }

    pub fn release(&self, session: &Arc<DocSession>) {
        self.attributes.remove(session);
    }

    /// Resolve the session's user. With a broken rule collection this fails
    /// (preventing any access) unless the gate runs in recovery mode.
    pub async fn get_user(
        &self,
        session: &Arc<DocSession>,
        rules: &Arc<RuleCollection>,
        recovery_mode: bool,
    ) -> Result<Arc<UserInfo>, GateError> {
        if let Some(err) = rules.rule_error() {
            if !recovery_mode {
                return Err(GateError::Rules(err.clone()));
            }
        }
        if let Some(cached) = self.attributes.get(session) {
            return Ok(Arc::new(assemble_user(session, &cached)));
        }

        let override_user = self.resolve_override(session).await?;
        let mut attrs = UserAttributes { override_user, rows: BTreeMap::new() };
        let mut user = assemble_user(session, &attrs);

        for rule in rules.get_user_attribute_rules() {
            if BUILTIN_USER_FIELDS.contains(&rule.name.as_str()) {
                warn!(
                    name = %rule.name,
                    "user attribute shadows a built-in field, ignoring"
                );
                continue;
            }
            let lookup_value = user.get_path(&rule.char_id);
            let query = Query {
                table_id: rule.table_id.clone(),
                filters: BTreeMap::from([(rule.lookup_col_id.clone(), vec![lookup_value])]),
            };
            let view = match self.storage.fetch_query(&query).await {
                Ok(data) => {
                    let data = Arc::new(data);
                    match data.row_ids.first().copied() {
                        Some(row_id) => RecordView::for_row(data, row_id)
                            .unwrap_or_else(|| RecordView::empty(Arc::new(TableDataAction::new(
                                rule.table_id.clone(),
                            )))),
                        None => RecordView::empty(data),
                    }
                }
                Err(err) => {
                    warn!(
                        name = %rule.name,
                        table_id = %rule.table_id,
                        "user attribute query failed, leaving attribute unset: {err}"
                    );
                    continue;
                }
            };
            attrs.rows.insert(rule.name.clone(), view.clone());
            user.attributes.insert(rule.name.clone(), view);
        }

        self.attributes.insert(session, Arc::new(attrs));
        Ok(Arc::new(user))
    }

    async fn resolve_override(
        &self,
        session: &Arc<DocSession>,
    ) -> Result<Option<UserOverride>, GateError> {
        let as_user_id = session.link_parameters.get(ACL_AS_USER_ID);
        let as_user = session.link_parameters.get(ACL_AS_USER);
        if as_user_id.is_none() && as_user.is_none() {
            return Ok(None);
        }
        if session.access != Some(Role::Owner) {
            return Err(GateError::AuthNoOwner);
        }
        let profile = if let Some(raw) = as_user_id {
            let user_id: i64 = raw
                .parse()
                .map_err(|_| GateError::bad_request(format!("bad {ACL_AS_USER_ID}: {raw}")))?;
            self.home_db.get_user_by_id(user_id).await?
        } else {
            // as_user is present when as_user_id is not.
            self.home_db
                .get_user_by_email(as_user.map(String::as_str).unwrap_or_default())
                .await?
        };
        Ok(Some(match profile {
            Some(profile) => UserOverride {
                user_id: profile.id,
                email: Some(profile.email),
                name: Some(profile.name),
                access: profile.access,
            },
            None => {
                warn!("impersonated user not found, denying access");
                UserOverride {
                    user_id: as_user_id.and_then(|raw| raw.parse().ok()).unwrap_or(0),
                    email: as_user.cloned(),
                    name: None,
                    access: None,
                }
            }
        }))
    }
}

/// Combine the session identity, any override, and cached attribute rows
/// into the rule-facing user object.
fn assemble_user(session: &Arc<DocSession>, attrs: &UserAttributes) -> UserInfo {
    let mut user = match &attrs.override_user {
        Some(over) => {
            let mut user = UserInfo::new(
                over.access,
                over.user_id,
                over.email.clone().unwrap_or_default(),
                over.name.clone().unwrap_or_default(),
            );
            user.origin = session.origin.clone();
            user
        }
        None => {
            let mut user = UserInfo::new(
                session.access,
                session.user_id,
                session.email.clone(),
                session.name.clone(),
            );
            user.origin = session.origin.clone();
            user
        }
    };
    user.link_key = session.link_parameters.clone();
    user.attributes = attrs.rows.clone();
    user
}
