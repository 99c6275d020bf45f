use thiserror::Error;

use crate::value::RowId;

/// Errors surfaced by the document data layer.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("column not found: {0}.{1}")]
    ColumnNotFound(String, String),
    #[error("row not found: {0}[{1}]")]
    RowNotFound(String, RowId),
    #[error("malformed action: {0}")]
    BadAction(String),
    #[error("storage error: {0}")]
    Storage(String),
}
