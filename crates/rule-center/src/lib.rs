//! Compiled access rules and their evaluation: the permission algebra, the
//! rule collection built from the structural tables, the lazy per-user
//! evaluator, and the ruler snapshot that pairs the two.

pub mod access_check;
pub mod collection;
pub mod errors;
pub mod formula;
pub mod permission_info;
pub mod perms;
pub mod ruler;
pub mod user;

pub use crate::access_check::{access_check_for_action, AccessCheck, AccessDenied, Severity};
pub use crate::collection::{AclRule, ColIdSpec, RuleCollection, RuleSet, UserAttributeRule};
pub use crate::errors::RuleError;
pub use crate::formula::{CompiledFormula, EvalContext, FormulaCompiler};
pub use crate::permission_info::{PermissionInfo, TableReadDisposition};
pub use crate::perms::{
    AccessAxis, PermBit, PermValue, PermissionSet, PermissionSetWithContext,
    PartialPermissionSet, RuleType,
};
pub use crate::ruler::{CacheKey, Ruler};
pub use crate::user::{Role, UserInfo};
