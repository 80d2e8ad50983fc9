// Provider selection
//
// Maps a validated provider config to the storage backend that will hold the administrator
// account. Providers without full support fall back to local file storage; the fallback is
// always reported as a warning, never silent.

use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::InitError;
use crate::models::provider::{ProviderConfig, ProviderId};
use crate::storage::{LocalFileStorage, PostgresStorage, StorageBackend, StorageCapability};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportLevel {
    /// Storage runs on the provider itself.
    Full,
    /// Connectivity can be verified, but accounts are kept in local file storage.
    LocalFallback,
}

pub fn support_level(provider: ProviderId) -> SupportLevel {
    match provider {
        ProviderId::Local | ProviderId::Postgres => SupportLevel::Full,
        ProviderId::MySql | ProviderId::SqlServer => SupportLevel::LocalFallback,
    }
}

pub struct Selection {
    pub storage: Arc<dyn StorageCapability>,
    /// Provider named by the config.
    pub requested: ProviderId,
    /// Provider actually backing `storage`.
    pub provider: ProviderId,
    /// Config describing `storage`; differs from the requested config after a fallback.
    pub effective: ProviderConfig,
    pub warning: Option<String>,
}

impl Selection {
    pub fn is_fallback(&self) -> bool {
        self.requested != self.provider
    }
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("requested", &self.requested)
            .field("provider", &self.provider)
            .field("warning", &self.warning)
            .finish_non_exhaustive()
    }
}

pub trait ProviderSelector: Send + Sync {
    fn select(&self, config: &ProviderConfig) -> Result<Selection, InitError>;
}

pub struct DefaultProviderSelector {
    fallback_path: PathBuf,
    acquire_timeout: Duration,
}

impl DefaultProviderSelector {
    pub fn new(fallback_path: impl Into<PathBuf>, acquire_timeout: Duration) -> Self {
        Self {
            fallback_path: fallback_path.into(),
            acquire_timeout,
        }
    }

    fn local(&self, path: PathBuf) -> Arc<dyn StorageCapability> {
        Arc::new(StorageBackend::LocalFile(LocalFileStorage::new(path)))
    }
}

impl ProviderSelector for DefaultProviderSelector {
    fn select(&self, config: &ProviderConfig) -> Result<Selection, InitError> {
        let requested = config.provider_id();
        let selection = match (config, support_level(requested)) {
            (ProviderConfig::Local { path }, _) => Selection {
                storage: self.local(path.clone()),
                requested,
                provider: ProviderId::Local,
                effective: config.clone(),
                warning: None,
            },
            (ProviderConfig::Postgres(_), SupportLevel::Full) => {
                let storage =
                    PostgresStorage::connect_lazy(&config.connection_string(), self.acquire_timeout)
                        .map_err(|e| InitError::Validation(format!("{:#}", e)))?;
                Selection {
                    storage: Arc::new(StorageBackend::Postgres(storage)),
                    requested,
                    provider: ProviderId::Postgres,
                    effective: config.clone(),
                    warning: None,
                }
            }
            _ => Selection {
                storage: self.local(self.fallback_path.clone()),
                requested,
                provider: ProviderId::Local,
                effective: ProviderConfig::Local {
                    path: self.fallback_path.clone(),
                },
                warning: Some(format!(
                    "Provider '{}' is not fully supported yet; administrator data is stored in local file storage at {}.",
                    requested,
                    self.fallback_path.display()
                )),
            },
        };

        match &selection.warning {
            Some(w) => warn!("[PHASE: database] [STEP: select_provider] {}", w),
            None => info!(
                "[PHASE: database] [STEP: select_provider] Using {} storage",
                selection.provider
            ),
        }
        Ok(selection)
    }
}
