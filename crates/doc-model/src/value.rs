//! Cell payloads and identifiers.

/// Row identifier inside one table. Zero is never a live row.
pub type RowId = i64;

/// Cell payloads stay loosely typed; the engine rewrites them without
/// interpreting their structure.
pub type CellValue = serde_json::Value;

/// Sentinel written over cells the viewer is not allowed to read.
pub const CENSORED_SENTINEL: &str = "CENSORED";

/// A fresh censored-cell sentinel value.
pub fn censored() -> CellValue {
    CellValue::String(CENSORED_SENTINEL.to_string())
}
