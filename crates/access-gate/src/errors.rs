use doc_model::DocError;
use rule_center::{AccessDenied, RuleError};
use thiserror::Error;

/// Wire error code for a hard denial.
pub const ACL_DENY: &str = "ACL_DENY";
/// Wire error code telling a client to reconnect.
pub const NEED_RELOAD: &str = "NEED_RELOAD";
/// Wire error code for impersonation attempted by a non-owner.
pub const AUTH_NO_OWNER: &str = "AUTH_NO_OWNER";

/// Errors surfaced by the access gate.
#[derive(Debug, Error)]
pub enum GateError {
    /// Hard denial from an ingress check, with memos from the denying rules.
    #[error("access denied")]
    AclDeny { memos: Vec<String> },
    /// The affected client must reload before it can continue.
    #[error("reload required")]
    NeedReload,
    /// Impersonation requested by a non-owner.
    #[error("only owners can impersonate")]
    AuthNoOwner,
    /// A proposed change that would leave the document un-loadable.
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("rules are misconfigured: {0}")]
    Rules(#[from] RuleError),
    #[error("bundle state error: {0}")]
    BundleState(String),
    #[error("data error: {0}")]
    Doc(#[from] DocError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        GateError::Api { status: 400, message: message.into() }
    }

    /// Wire code, when the error maps to one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            GateError::AclDeny { .. } => Some(ACL_DENY),
            GateError::NeedReload => Some(NEED_RELOAD),
            GateError::AuthNoOwner => Some(AUTH_NO_OWNER),
            _ => None,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            GateError::AclDeny { .. } => 403,
            GateError::Api { status, .. } => *status,
            _ => 500,
        }
    }
}

impl From<AccessDenied> for GateError {
    fn from(err: AccessDenied) -> Self {
        GateError::AclDeny { memos: err.memos }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses() {
        let deny = GateError::AclDeny { memos: vec!["why".into()] };
        assert_eq!(deny.code(), Some(ACL_DENY));
        assert_eq!(deny.status(), 403);
        assert_eq!(GateError::NeedReload.code(), Some(NEED_RELOAD));
        assert_eq!(GateError::bad_request("nope").status(), 400);
        assert_eq!(GateError::Internal("x".into()).code(), None);
    }
}
