//! Document data model shared by the access control engine: cell values,
//! document actions, the in-memory relational snapshot, and row-shaped views.

pub mod action;
pub mod doc_data;
pub mod errors;
pub mod meta;
pub mod record;
pub mod table_data;
pub mod user_action;
pub mod value;

pub use crate::action::{BulkColValues, ColInfo, ColValues, DocAction};
pub use crate::doc_data::{DocData, DocStorage, Query};
pub use crate::errors::DocError;
pub use crate::record::{RecordEditor, RecordView};
pub use crate::table_data::TableDataAction;
pub use crate::user_action::{scan_user_actions, UserAction, UserActionClass};
pub use crate::value::{censored, CellValue, RowId};
