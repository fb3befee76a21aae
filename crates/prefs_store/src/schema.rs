use agent_bridge::ConnectionMode;
use serde::{Deserialize, Serialize};

pub const PREFS_VERSION: u32 = 1;

/// On-disk preferences record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefsRecord {
    pub version: u32,
    pub onboarding_complete: bool,
    pub default_connection_mode: ConnectionMode,
    pub updated_at: String,
}

impl PrefsRecord {
    #[must_use]
    pub fn v1(updated_at: impl Into<String>) -> Self {
        Self {
            version: PREFS_VERSION,
            onboarding_complete: false,
            default_connection_mode: ConnectionMode::default(),
            updated_at: updated_at.into(),
        }
    }
}
