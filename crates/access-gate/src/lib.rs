//! Granular access control for a collaborative document: gates incoming
//! change bundles, and rewrites each committed bundle per viewer so clients
//! only ever see rows, columns and metadata they may read.

pub mod bundle;
pub mod censor;
pub mod column_filter;
pub mod config;
pub mod errors;
pub mod gate;
pub mod row_filter;
pub mod session;
pub mod steps;
pub mod user_resolver;

pub use crate::bundle::{ActionBundle, BundlePhase};
pub use crate::censor::{CensorOutcome, CensorshipInfo};
pub use crate::config::GateConfig;
pub use crate::errors::{GateError, ACL_DENY, AUTH_NO_OWNER, NEED_RELOAD};
pub use crate::gate::{AccessGate, ActionGroup, Broadcaster, DocUpdateMessage, Subscriber};
pub use crate::session::{
    session_key, DocSession, SessionCache, SessionKey, UserAttributes, UserOverride,
};
pub use crate::steps::{build_steps, related_rows, rows_for_new_rec, ActionStep};
pub use crate::user_resolver::{HomeDb, UserProfile, UserResolver};
