// Deployment context (derived, never persisted on its own)

use serde::{Deserialize, Serialize};

use super::provider::ProviderId;

/// Outcome of checking the environment's provider signals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentContext {
    pub is_containerized: bool,
    pub has_local_env_file: bool,
    #[serde(default)]
    pub detected_provider: Option<ProviderId>,
    #[serde(default)]
    pub env_validation: Option<ValidationResult>,
}

impl DeploymentContext {
    /// True when the environment fully configures a provider on its own.
    pub fn has_valid_environment_provider(&self) -> bool {
        self.detected_provider.is_some()
            && self
                .env_validation
                .as_ref()
                .map(|v| v.is_valid)
                .unwrap_or(false)
    }
}
