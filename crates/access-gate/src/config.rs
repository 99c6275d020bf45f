//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::errors::GateError;

/// Options the host passes when wiring the gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// In recovery mode a rule compilation error no longer blocks user
    /// resolution, so an owner can repair broken rules.
    #[serde(default)]
    pub recovery_mode: bool,
}

impl GateConfig {
    pub fn from_json_str(raw: &str) -> Result<GateConfig, GateError> {
        serde_json::from_str(raw)
            .map_err(|e| GateError::Internal(format!("failed to parse gate config: {e}")))
    }
}
