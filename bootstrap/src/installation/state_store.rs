// Initialization state store
//
// Sole owner of `<data_dir>/initialization.json`. Whether the application is initialized is
// decided by an ordered list of named checks; the first definitive answer wins.

use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::environment::{resolve, resolve_provider_config, EnvironmentSource};
use crate::error::InitError;
use crate::installation::files::{backup_file, write_atomic};
use crate::models::deployment::DeploymentContext;
use crate::models::record::{DatabaseRecord, InitializationRecord};
use crate::models::responses::ResetOutcome;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Yes,
    No,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitCheck {
    /// The environment fully configures a provider.
    Environment,
    /// The persisted marker.
    MarkerFile,
}

impl InitCheck {
    pub const ORDER: [InitCheck; 2] = [InitCheck::Environment, InitCheck::MarkerFile];

    pub fn name(&self) -> &'static str {
        match self {
            InitCheck::Environment => "environment",
            InitCheck::MarkerFile => "marker_file",
        }
    }
}

/// Result of walking the check list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDecision {
    pub initialized: bool,
    /// Check that produced the answer; `None` when every check was inconclusive.
    pub decided_by: Option<InitCheck>,
}

enum MarkerState {
    Absent,
    Malformed,
    Present(InitializationRecord),
}

pub struct StateStore {
    marker_path: PathBuf,
    env_file: PathBuf,
    environment: Arc<dyn EnvironmentSource>,
}

impl StateStore {
    pub fn new(settings: &Settings, environment: Arc<dyn EnvironmentSource>) -> Self {
        Self {
            marker_path: settings.marker_path(),
            env_file: settings.env_file.clone(),
            environment,
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    /// Deployment context from a fresh snapshot.
    pub fn context(&self) -> DeploymentContext {
        resolve(&self.environment.snapshot())
    }

    pub async fn is_initialized(&self) -> bool {
        self.decide().await.initialized
    }

    pub async fn decide(&self) -> InitDecision {
        for check in InitCheck::ORDER {
            let outcome = self.run_check(check).await;
            debug!(
                "[PHASE: state] [STEP: is_initialized] check={} outcome={:?}",
                check.name(),
                outcome
            );
            match outcome {
                CheckOutcome::Yes => {
                    return InitDecision {
                        initialized: true,
                        decided_by: Some(check),
                    }
                }
                CheckOutcome::No => {
                    return InitDecision {
                        initialized: false,
                        decided_by: Some(check),
                    }
                }
                CheckOutcome::Unknown => continue,
            }
        }
        InitDecision {
            initialized: false,
            decided_by: None,
        }
    }

    async fn run_check(&self, check: InitCheck) -> CheckOutcome {
        match check {
            InitCheck::Environment => {
                if self.context().has_valid_environment_provider() {
                    CheckOutcome::Yes
                } else {
                    CheckOutcome::Unknown
                }
            }
            InitCheck::MarkerFile => match self.read_marker().await {
                MarkerState::Absent | MarkerState::Malformed => CheckOutcome::No,
                MarkerState::Present(record) if record.is_initialized => CheckOutcome::Yes,
                MarkerState::Present(_) => CheckOutcome::No,
            },
        }
    }

    async fn read_marker(&self) -> MarkerState {
        let bytes = match tokio::fs::read(&self.marker_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return MarkerState::Absent,
            Err(e) => {
                warn!(
                    "[PHASE: state] [STEP: read_marker] Failed to read {:?}: {}",
                    self.marker_path, e
                );
                return MarkerState::Malformed;
            }
        };
        match serde_json::from_slice::<InitializationRecord>(&bytes) {
            Ok(record) if record.is_complete() => MarkerState::Present(record),
            Ok(_) => {
                warn!(
                    "[PHASE: state] [STEP: read_marker] {:?} claims initialization but is missing required fields; treating as not initialized",
                    self.marker_path
                );
                MarkerState::Malformed
            }
            Err(e) => {
                warn!(
                    "[PHASE: state] [STEP: read_marker] {:?} is malformed ({}); treating as not initialized",
                    self.marker_path, e
                );
                MarkerState::Malformed
            }
        }
    }

    /// The persisted record, or a stub describing the current environment. Never fails.
    pub async fn status(&self) -> InitializationRecord {
        let snapshot = self.environment.snapshot();
        let context = resolve(&snapshot);
        if context.has_valid_environment_provider() {
            if let MarkerState::Present(record) = self.read_marker().await {
                if record.is_initialized {
                    return record;
                }
            }
            // Externally configured deployment: no marker will ever exist.
            let mut stub = InitializationRecord::uninitialized(context);
            stub.is_initialized = true;
            stub.database = resolve_provider_config(&snapshot).map(|config| DatabaseRecord {
                provider: config.provider_id(),
                name: config.database_name(),
                connection_string: config.connection_string(),
                env_generated: false,
            });
            return stub;
        }
        match self.read_marker().await {
            MarkerState::Present(record) => record,
            MarkerState::Absent | MarkerState::Malformed => {
                InitializationRecord::uninitialized(context)
            }
        }
    }

    /// Write the marker atomically (temp file, fsync, rename).
    pub async fn persist(&self, record: &InitializationRecord) -> Result<(), InitError> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| InitError::Persistence(e.to_string()))?;
        write_atomic(&self.marker_path, &bytes)
            .await
            .map_err(|e| InitError::Persistence(format!("{:#}", e)))?;
        info!(
            "[PHASE: state] [STEP: persist] Wrote {:?} (is_initialized={})",
            self.marker_path, record.is_initialized
        );
        Ok(())
    }

    /// Remove the marker. A local env file is backed up first; it is removed only when the
    /// marker records that this engine generated it.
    pub async fn reset(&self) -> Result<ResetOutcome, InitError> {
        let env_generated = match self.read_marker().await {
            MarkerState::Present(record) => record.database.map(|d| d.env_generated).unwrap_or(false),
            MarkerState::Absent | MarkerState::Malformed => false,
        };

        let env_exists = tokio::fs::try_exists(&self.env_file).await.unwrap_or(false);
        let env_backup = if env_exists {
            let backup = backup_file(&self.env_file).await.map_err(|e| {
                InitError::Reset(format!(
                    "Could not back up {:?}; nothing was removed: {:#}",
                    self.env_file, e
                ))
            })?;
            info!(
                "[PHASE: state] [STEP: reset] Backed up {:?} to {:?}",
                self.env_file, backup
            );
            Some(backup)
        } else {
            None
        };

        let marker_removed = remove_if_exists(&self.marker_path)
            .await
            .map_err(|e| InitError::Reset(format!("Failed to remove {:?}: {}", self.marker_path, e)))?;

        let env_removed = if env_exists && env_generated {
            remove_if_exists(&self.env_file)
                .await
                .map_err(|e| InitError::Reset(format!("Failed to remove {:?}: {}", self.env_file, e)))?
        } else {
            false
        };

        warn!(
            "[PHASE: state] [STEP: reset] Reset complete (marker_removed={}, env_removed={})",
            marker_removed, env_removed
        );
        Ok(ResetOutcome {
            marker_removed,
            env_backup,
            env_removed,
        })
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvSnapshot;
    use crate::models::provider::ProviderId;
    use crate::models::record::AdminIdentity;

    fn store(dir: &Path, env: EnvSnapshot) -> StateStore {
        StateStore::new(&Settings::rooted_at(dir), Arc::new(env))
    }

    fn complete_record() -> InitializationRecord {
        InitializationRecord {
            is_initialized: true,
            admin_user: Some(AdminIdentity {
                id: "1".to_string(),
                username: "admin".to_string(),
                email: "admin@example.com".to_string(),
            }),
            database: Some(DatabaseRecord {
                provider: ProviderId::Local,
                name: "app-db".to_string(),
                connection_string: "file:/tmp/app-db.json".to_string(),
                env_generated: true,
            }),
            deployment_context: DeploymentContext::default(),
            created_at: Some(chrono::Utc::now()),
        }
    }

    fn postgres_env() -> EnvSnapshot {
        EnvSnapshot::new().with_var("POSTGRES_URL", "postgres://u:p@db:5432/app")
    }

    #[tokio::test]
    async fn absent_marker_is_not_initialized() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), EnvSnapshot::new());
        let decision = store.decide().await;
        assert!(!decision.initialized);
        assert_eq!(decision.decided_by, Some(InitCheck::MarkerFile));
        assert!(!store.status().await.is_initialized);
    }

    #[tokio::test]
    async fn environment_takes_precedence_over_uninitialized_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), postgres_env());
        let mut record = complete_record();
        record.is_initialized = false;
        store.persist(&record).await.unwrap();

        let decision = store.decide().await;
        assert!(decision.initialized);
        assert_eq!(decision.decided_by, Some(InitCheck::Environment));

        let status = store.status().await;
        assert!(status.is_initialized);
        assert_eq!(status.database.unwrap().provider, ProviderId::Postgres);
    }

    #[tokio::test]
    async fn malformed_marker_degrades_to_not_initialized() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), EnvSnapshot::new());
        std::fs::create_dir_all(store.marker_path().parent().unwrap()).unwrap();
        std::fs::write(store.marker_path(), "{\"isInitialized\": tru").unwrap();

        assert!(!store.is_initialized().await);
        assert!(!store.status().await.is_initialized);
    }

    #[tokio::test]
    async fn incomplete_initialized_marker_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), EnvSnapshot::new());
        std::fs::create_dir_all(store.marker_path().parent().unwrap()).unwrap();
        std::fs::write(store.marker_path(), r#"{"isInitialized": true}"#).unwrap();

        assert!(!store.is_initialized().await);
    }

    #[tokio::test]
    async fn persisted_marker_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), EnvSnapshot::new());
        let record = complete_record();
        store.persist(&record).await.unwrap();

        assert!(store.is_initialized().await);
        assert_eq!(store.status().await, record);
    }

    #[tokio::test]
    async fn reset_backs_up_generated_env_file_then_removes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), EnvSnapshot::new());
        store.persist(&complete_record()).await.unwrap();
        std::fs::write(store.env_file(), "DATABASE_PROVIDER=local\n").unwrap();

        let outcome = store.reset().await.unwrap();

        assert!(outcome.marker_removed);
        assert!(outcome.env_removed);
        let backup = outcome.env_backup.unwrap();
        assert_eq!(
            std::fs::read_to_string(backup).unwrap(),
            "DATABASE_PROVIDER=local\n"
        );
        assert!(!store.marker_path().exists());
        assert!(!store.env_file().exists());
    }

    #[tokio::test]
    async fn reset_keeps_env_file_not_generated_here() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), EnvSnapshot::new());
        let mut record = complete_record();
        if let Some(db) = record.database.as_mut() {
            db.env_generated = false;
        }
        store.persist(&record).await.unwrap();
        std::fs::write(store.env_file(), "CUSTOM=1\n").unwrap();

        let outcome = store.reset().await.unwrap();
        assert!(outcome.env_backup.is_some());
        assert!(!outcome.env_removed);
        assert!(store.env_file().exists());
    }

    #[tokio::test]
    async fn reset_without_anything_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = store(tmp.path(), EnvSnapshot::new()).reset().await.unwrap();
        assert!(!outcome.marker_removed);
        assert!(outcome.env_backup.is_none());
    }
}
