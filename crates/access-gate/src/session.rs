//! Sessions and the weak-keyed caches hung off them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use doc_model::RecordView;
use parking_lot::Mutex;
use rule_center::Role;

/// Link parameter naming a user id to impersonate.
pub const ACL_AS_USER_ID: &str = "aclAsUserId";
/// Link parameter naming a user email to impersonate.
pub const ACL_AS_USER: &str = "aclAsUser";

/// One client connection to the document, as described by the host's
/// authorizer. The gate never mutates it.
#[derive(Debug)]
pub struct DocSession {
    pub access: Option<Role>,
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub link_parameters: BTreeMap<String, String>,
    pub origin: Option<String>,
}

impl DocSession {
    pub fn new(access: Option<Role>, user_id: i64, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            access,
            user_id,
            email: email.into(),
            name: name.into(),
            link_parameters: BTreeMap::new(),
            origin: None,
        }
    }
}

/// Cache key derived from session identity. Two clones of the same
/// `Arc<DocSession>` share a key; a re-created session does not.
pub type SessionKey = u64;

pub fn session_key(session: &Arc<DocSession>) -> SessionKey {
    Arc::as_ptr(session) as SessionKey
}

/// Identity override resolved from impersonation link parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct UserOverride {
    pub user_id: i64,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Access of the impersonated identity; `None` means denied everywhere.
    pub access: Option<Role>,
}

/// Everything resolved per session beyond the base identity: the
/// impersonation override and the rows attached by user-attribute rules.
#[derive(Debug, Clone, Default)]
pub struct UserAttributes {
    pub override_user: Option<UserOverride>,
    pub rows: BTreeMap<String, RecordView>,
}

impl UserAttributes {
    /// Stable serialization of the attribute rows, for divergence checks.
    pub fn rows_fingerprint(&self) -> String {
        let encoded: BTreeMap<&str, serde_json::Value> = self
            .rows
            .iter()
            .map(|(name, view)| (name.as_str(), view.to_json()))
            .collect();
        serde_json::to_string(&encoded).unwrap_or_default()
    }
}

/// Map keyed by session identity holding weak session references; entries
/// for dropped sessions fall out on access.
pub struct SessionCache<T> {
    inner: Mutex<HashMap<SessionKey, (Weak<DocSession>, T)>>,
}

impl<T: Clone> SessionCache<T> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, session: &Arc<DocSession>) -> Option<T> {
        let mut inner = self.inner.lock();
        inner.retain(|_, (weak, _)| weak.strong_count() > 0);
        inner.get(&session_key(session)).map(|(_, value)| value.clone())
    }

    pub fn insert(&self, session: &Arc<DocSession>, value: T) {
        self.inner
            .lock()
            .insert(session_key(session), (Arc::downgrade(session), value));
    }

    pub fn remove(&self, session: &Arc<DocSession>) {
        self.inner.lock().remove(&session_key(session));
    }

    /// Replace the whole map with an empty one, returning the live entries.
    pub fn take_entries(&self) -> HashMap<SessionKey, T> {
        let mut inner = self.inner.lock();
        let out = inner
            .iter()
            .filter(|(_, (weak, _))| weak.strong_count() > 0)
            .map(|(key, (_, value))| (*key, value.clone()))
            .collect();
        inner.clear();
        out
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl<T: Clone> Default for SessionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
