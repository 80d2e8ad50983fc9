// Backup database configuration store
//
// `<data_dir>/database-configs.json` keeps named provider configs so an operator can switch
// back to a known-good one. Exactly one entry is active. When the environment fully describes
// a provider, an `env` entry is synthesized on load, takes precedence as the active entry, and
// is never written back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::installation::files::write_atomic;
use crate::models::provider::{ProviderConfig, ProviderId};
use crate::utils::logging::mask_connection_string;

pub const ENV_ENTRY_ID: &str = "env";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDatabaseConfig {
    pub id: String,
    pub name: String,
    pub config: ProviderConfig,
    pub is_active: bool,
    #[serde(default, skip_serializing)]
    pub from_environment: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing view with credentials masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfigSummary {
    pub id: String,
    pub name: String,
    pub provider: ProviderId,
    pub connection_string: String,
    pub is_active: bool,
    pub from_environment: bool,
}

impl From<&StoredDatabaseConfig> for DatabaseConfigSummary {
    fn from(entry: &StoredDatabaseConfig) -> Self {
        DatabaseConfigSummary {
            id: entry.id.clone(),
            name: entry.name.clone(),
            provider: entry.config.provider_id(),
            connection_string: mask_connection_string(&entry.config.connection_string()),
            is_active: entry.is_active,
            from_environment: entry.from_environment,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    configs: Vec<StoredDatabaseConfig>,
}

pub struct DatabaseConfigStore {
    path: PathBuf,
    env_config: Option<ProviderConfig>,
}

impl DatabaseConfigStore {
    pub fn new(path: impl Into<PathBuf>, env_config: Option<ProviderConfig>) -> Self {
        Self {
            path: path.into(),
            env_config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<ConfigFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("{:?} is not a valid configuration store", self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", self.path)),
        }
    }

    async fn write_file(&self, file: &ConfigFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(file)?;
        write_atomic(&self.path, &bytes).await
    }

    /// All entries, env entry first when present.
    pub async fn load(&self) -> Result<Vec<StoredDatabaseConfig>> {
        let mut configs = self.read_file().await?.configs;
        if let Some(env_config) = &self.env_config {
            for entry in configs.iter_mut() {
                entry.is_active = false;
            }
            let now = Utc::now();
            configs.insert(
                0,
                StoredDatabaseConfig {
                    id: ENV_ENTRY_ID.to_string(),
                    name: "Environment".to_string(),
                    config: env_config.clone(),
                    is_active: true,
                    from_environment: true,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        debug!(
            "[PHASE: config_store] [STEP: load] {} entr(ies) from {:?}",
            configs.len(),
            self.path
        );
        Ok(configs)
    }

    pub async fn list(&self) -> Result<Vec<DatabaseConfigSummary>> {
        Ok(self.load().await?.iter().map(DatabaseConfigSummary::from).collect())
    }

    pub async fn active(&self) -> Result<Option<StoredDatabaseConfig>> {
        Ok(self.load().await?.into_iter().find(|c| c.is_active))
    }

    /// Insert or update the entry with the same connection target, optionally making it active.
    /// Returns the entry id.
    pub async fn upsert(&self, name: &str, config: &ProviderConfig, activate: bool) -> Result<String> {
        let mut file = self.read_file().await?;
        let now = Utc::now();
        let target = config.connection_string();

        let id = match file
            .configs
            .iter_mut()
            .find(|c| c.config.connection_string() == target)
        {
            Some(existing) => {
                existing.name = name.to_string();
                existing.config = config.clone();
                existing.updated_at = now;
                existing.id.clone()
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                file.configs.push(StoredDatabaseConfig {
                    id: id.clone(),
                    name: name.to_string(),
                    config: config.clone(),
                    is_active: false,
                    from_environment: false,
                    created_at: now,
                    updated_at: now,
                });
                id
            }
        };

        if activate || !file.configs.iter().any(|c| c.is_active) {
            for entry in file.configs.iter_mut() {
                entry.is_active = entry.id == id;
            }
        }
        self.write_file(&file).await?;
        info!(
            "[PHASE: config_store] [STEP: upsert] Saved '{}' ({}, {})",
            name,
            config.provider_id(),
            mask_connection_string(&target)
        );
        Ok(id)
    }

    pub async fn set_active(&self, id: &str) -> Result<()> {
        if id == ENV_ENTRY_ID {
            anyhow::bail!("The environment entry is always active while the environment defines it");
        }
        let mut file = self.read_file().await?;
        if !file.configs.iter().any(|c| c.id == id) {
            anyhow::bail!("No stored configuration with id '{}'", id);
        }
        for entry in file.configs.iter_mut() {
            entry.is_active = entry.id == id;
        }
        self.write_file(&file).await?;
        info!("[PHASE: config_store] [STEP: set_active] Active configuration is now {}", id);
        Ok(())
    }

    /// Remove an entry. Removing the active entry promotes the first remaining one.
    pub async fn remove(&self, id: &str) -> Result<()> {
        if id == ENV_ENTRY_ID {
            anyhow::bail!("The environment entry cannot be removed");
        }
        let mut file = self.read_file().await?;
        let before = file.configs.len();
        let was_active = file.configs.iter().any(|c| c.id == id && c.is_active);
        file.configs.retain(|c| c.id != id);
        if file.configs.len() == before {
            anyhow::bail!("No stored configuration with id '{}'", id);
        }
        if was_active {
            if let Some(first) = file.configs.first_mut() {
                first.is_active = true;
            }
        }
        self.write_file(&file).await?;
        info!("[PHASE: config_store] [STEP: remove] Removed configuration {}", id);
        Ok(())
    }
}
