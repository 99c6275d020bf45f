use doc_model::DocError;
use thiserror::Error;

/// Errors surfaced while building or evaluating access rules.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule compilation failed: {0}")]
    Compile(String),
    #[error("invalid permissions text: {0}")]
    BadPermissions(String),
    #[error("invalid rule resource: {0}")]
    BadResource(String),
    #[error("document entity check failed: {0}")]
    EntityCheck(String),
    #[error("formula evaluation failed: {0}")]
    Eval(String),
    #[error("data error: {0}")]
    Doc(#[from] DocError),
}

impl Clone for RuleError {
    fn clone(&self) -> Self {
        match self {
            RuleError::Compile(s) => RuleError::Compile(s.clone()),
            RuleError::BadPermissions(s) => RuleError::BadPermissions(s.clone()),
            RuleError::BadResource(s) => RuleError::BadResource(s.clone()),
            RuleError::EntityCheck(s) => RuleError::EntityCheck(s.clone()),
            RuleError::Eval(s) => RuleError::Eval(s.clone()),
            RuleError::Doc(e) => RuleError::Eval(e.to_string()),
        }
    }
}
