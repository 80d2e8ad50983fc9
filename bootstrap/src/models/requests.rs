// Request models for the provisioning entry points

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::provider::{NetworkConfig, ProviderConfig, ProviderId};
use crate::utils::validation::{validate_email, validate_password, validate_username};

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

// Manual Debug so the password never reaches a log line.
impl std::fmt::Debug for AdminRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

impl AdminRequest {
    pub fn validate(&self) -> Result<(), String> {
        let problems: Vec<String> = [
            validate_username(self.username.trim()),
            validate_email(self.email.trim()),
            validate_password(&self.password),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join(" "))
        }
    }
}

/// Provider request as it arrives from a caller: the provider is a free-form string so that
/// unknown identifiers can be reported (and fall back) instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRequest {
    pub provider: String,
    /// Display name for the backup configuration store.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub network: NetworkConfig,
}

impl DatabaseRequest {
    /// Convert into a typed config. Unknown providers become a local config plus a warning.
    pub fn to_provider_config(&self, default_local_path: &Path) -> (ProviderConfig, Option<String>) {
        let local = || ProviderConfig::Local {
            path: self
                .path
                .clone()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| default_local_path.to_path_buf()),
        };

        match ProviderId::parse(&self.provider) {
            Some(ProviderId::Local) => (local(), None),
            Some(ProviderId::Postgres) => (
                ProviderConfig::Postgres(self.network_config(ProviderId::Postgres)),
                None,
            ),
            Some(ProviderId::MySql) => (
                ProviderConfig::MySql(self.network_config(ProviderId::MySql)),
                None,
            ),
            Some(ProviderId::SqlServer) => (
                ProviderConfig::SqlServer(self.network_config(ProviderId::SqlServer)),
                None,
            ),
            None => (
                local(),
                Some(format!(
                    "Unknown provider '{}'; falling back to local file storage.",
                    self.provider.trim()
                )),
            ),
        }
    }

    fn network_config(&self, provider: ProviderId) -> NetworkConfig {
        let mut net = self.network.clone();
        // A connection string that declares SSL and an unset flag should not conflict.
        if let Some(cs) = net.connection_string.as_deref() {
            if !net.ssl {
                net.ssl = super::provider::infer_ssl(provider, cs).unwrap_or(false);
            }
        }
        net
    }

    pub fn display_name(&self, config: &ProviderConfig) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| config.database_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub admin: AdminRequest,
    pub database: DatabaseRequest,
    /// Write a local env file describing the chosen provider.
    #[serde(default)]
    pub generate_env_file: bool,
    /// Keep the existing env file untouched even if `generate_env_file` is set.
    #[serde(default)]
    pub use_existing_config: bool,
}
