//! A rule collection paired with a per-session evaluation cache: the rule
//! state at one point in a bundle.

use std::collections::HashMap;
use std::sync::Arc;

use doc_model::DocData;
use parking_lot::Mutex;

use crate::collection::RuleCollection;
use crate::formula::FormulaCompiler;
use crate::permission_info::PermissionInfo;
use crate::user::UserInfo;

/// Identity of a session in ruler caches. Derived by the caller from session
/// identity; never dereferenced here.
pub type CacheKey = u64;

pub struct Ruler {
    rules: Arc<RuleCollection>,
    cache: Mutex<HashMap<CacheKey, Arc<PermissionInfo>>>,
}

impl Ruler {
    pub fn new(rules: Arc<RuleCollection>) -> Self {
        Self { rules, cache: Mutex::new(HashMap::new()) }
    }

    /// Build a fresh ruler from the current snapshot.
    pub fn build(doc_data: &DocData, compiler: &dyn FormulaCompiler) -> Self {
        Self::new(Arc::new(RuleCollection::build(doc_data, compiler)))
    }

    pub fn rules(&self) -> &Arc<RuleCollection> {
        &self.rules
    }

    /// The session's evaluator, created lazily. Callers pass the same user
    /// for the same key; a changed identity requires `forget` first.
    pub fn permission_info(&self, key: CacheKey, user: &Arc<UserInfo>) -> Arc<PermissionInfo> {
        self.cache
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(PermissionInfo::new(self.rules.clone(), user.clone())))
            .clone()
    }

    pub fn forget(&self, key: CacheKey) {
        self.cache.lock().remove(&key);
    }

    /// Drop every cached evaluator; invoked on schema or user-attribute
    /// source changes.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
