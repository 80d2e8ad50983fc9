// Initialization orchestrator
//
// Uninitialized -> ConnectionVerified -> StorageProvisioned -> AdminCreated -> Persisted, with
// Failed reachable from every non-terminal phase. Nothing downstream of a failed phase runs.
//
// Known window: the administrator account exists before the marker is written. A persist
// failure is reported as `Persistence` so the operator knows to reset or re-check.

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::database::config_store::DatabaseConfigStore;
use crate::database::connection::{ConnectionVerifier, DbConnector, RealDbConnector, RetryPolicy};
use crate::database::provider_selector::{DefaultProviderSelector, ProviderSelector, Selection};
use crate::environment::{resolve_provider_config, EnvironmentSource, ProcessEnvironment};
use crate::error::InitError;
use crate::installation::env_file::{deployment_instructions, restore_env_file, write_env_file};
use crate::installation::lock::InitLock;
use crate::installation::state_store::StateStore;
use crate::models::record::{AdminIdentity, DatabaseRecord, InitializationRecord};
use crate::models::requests::ProvisionRequest;
use crate::security::password::{PasswordHasher, Pbkdf2PasswordHasher};
use crate::settings::Settings;
use crate::storage::NewUser;
use crate::utils::logging::mask_connection_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    Uninitialized,
    ConnectionVerified,
    StorageProvisioned,
    AdminCreated,
    Persisted,
    Failed,
}

/// Successful outcome of a provision call.
#[derive(Debug, Clone)]
pub enum ProvisionOutcome {
    /// Nothing was changed; carries the current status.
    AlreadyInitialized(InitializationRecord),
    Provisioned {
        record: InitializationRecord,
        warnings: Vec<String>,
        deployment_instructions: Vec<String>,
        env_backup: Option<PathBuf>,
    },
}

pub struct Orchestrator {
    settings: Settings,
    environment: Arc<dyn EnvironmentSource>,
    state: StateStore,
    verifier: ConnectionVerifier,
    selector: Arc<dyn ProviderSelector>,
    hasher: Arc<dyn PasswordHasher>,
    // Serializes provision calls within this process; the lock file covers other processes.
    run_lock: tokio::sync::Mutex<()>,
    phase: std::sync::Mutex<InitPhase>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        environment: Arc<dyn EnvironmentSource>,
        connector: Arc<dyn DbConnector>,
        selector: Arc<dyn ProviderSelector>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        let state = StateStore::new(&settings, environment.clone());
        let verifier = ConnectionVerifier::new(connector, RetryPolicy::from_settings(&settings));
        Self {
            settings,
            environment,
            state,
            verifier,
            selector,
            hasher,
            run_lock: tokio::sync::Mutex::new(()),
            phase: std::sync::Mutex::new(InitPhase::Uninitialized),
        }
    }

    /// Production wiring: real process environment, drivers and PBKDF2 hashing.
    pub fn from_settings(settings: Settings) -> Self {
        let environment = Arc::new(ProcessEnvironment::new(settings.env_file.clone()));
        let connector = Arc::new(RealDbConnector::new(settings.connect_timeout()));
        let selector = Arc::new(DefaultProviderSelector::new(
            settings.local_db_path(),
            settings.connect_timeout(),
        ));
        Self::new(
            settings,
            environment,
            connector,
            selector,
            Arc::new(Pbkdf2PasswordHasher::default()),
        )
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn verifier(&self) -> &ConnectionVerifier {
        &self.verifier
    }

    /// Backup configuration store, with the environment entry for the current snapshot.
    pub fn config_store(&self) -> DatabaseConfigStore {
        DatabaseConfigStore::new(
            self.settings.configs_path(),
            resolve_provider_config(&self.environment.snapshot()),
        )
    }

    /// Phase reached by the most recent provision call.
    pub fn last_phase(&self) -> InitPhase {
        self.phase
            .lock()
            .map(|p| *p)
            .unwrap_or(InitPhase::Failed)
    }

    fn enter(&self, phase: InitPhase) {
        info!("[PHASE: orchestrator] [STEP: {:?}] entered", phase);
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
    }

    /// Run the full uninitialized -> initialized transition.
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, InitError> {
        let _serialized = self.run_lock.lock().await;
        let started = Instant::now();
        self.enter(InitPhase::Uninitialized);

        let result = self.run(request).await;
        match &result {
            Ok(ProvisionOutcome::AlreadyInitialized(_)) => info!(
                "[PHASE: orchestrator] [STEP: provision] Already initialized; nothing changed"
            ),
            Ok(ProvisionOutcome::Provisioned { .. }) => info!(
                "[PHASE: orchestrator] [STEP: provision] Initialization complete (duration_ms={})",
                started.elapsed().as_millis()
            ),
            Err(e) => {
                let reached = self.last_phase();
                self.enter(InitPhase::Failed);
                error!(
                    "[PHASE: orchestrator] [STEP: provision] Failed after {:?} (kind={}): {}",
                    reached,
                    e.kind(),
                    e
                );
            }
        }
        result
    }

    async fn run(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, InitError> {
        if self.state.is_initialized().await {
            return Ok(ProvisionOutcome::AlreadyInitialized(self.state.status().await));
        }

        request.admin.validate().map_err(InitError::Validation)?;
        let mut warnings = Vec::new();
        let (config, provider_warning) =
            request.database.to_provider_config(&self.settings.local_db_path());
        warnings.extend(provider_warning);
        config.validate().map_err(InitError::Validation)?;

        let _lock =
            InitLock::acquire(&self.settings.lock_path(), self.settings.lock_stale_after()).await?;
        // Another process may have finished while we waited for the lock.
        if self.state.is_initialized().await {
            return Ok(ProvisionOutcome::AlreadyInitialized(self.state.status().await));
        }

        // Uninitialized -> ConnectionVerified
        let test = self.verifier.test_connection(&config).await;
        if !test.success {
            let message = test
                .error
                .unwrap_or_else(|| "Connection test failed".to_string());
            return Err(if test.attempts == 0 {
                InitError::Validation(message)
            } else {
                InitError::Connection(message)
            });
        }
        self.enter(InitPhase::ConnectionVerified);

        // ConnectionVerified -> StorageProvisioned
        // Selection does no I/O; it runs first so a generated env file describes the storage
        // that will actually hold the account.
        let selection = self.selector.select(&config)?;
        warnings.extend(selection.warning.clone());

        let write_env = request.generate_env_file && !request.use_existing_config;
        let env_backup = if write_env {
            write_env_file(&self.settings.env_file, &selection.effective)
                .await
                .map_err(|e| InitError::Io(std::io::Error::other(format!("{:#}", e))))?
        } else {
            None
        };

        // A generated env file left behind by a failed run would make the next status check
        // report "initialized" from the environment, so it is rolled back with the run.
        let (record, admin) = match self.commit(request, &selection, write_env).await {
            Ok(committed) => committed,
            Err(e) => {
                if write_env {
                    if let Err(restore) =
                        restore_env_file(&self.settings.env_file, env_backup.as_deref()).await
                    {
                        error!(
                            "[PHASE: orchestrator] [STEP: rollback] Could not roll back {:?}: {:#}",
                            self.settings.env_file, restore
                        );
                    }
                }
                return Err(e);
            }
        };
        let effective = &selection.effective;
        let context = record.deployment_context.clone();

        let store = self.config_store();
        let name = request.database.display_name(effective);
        if let Err(e) = store.upsert(&name, effective, true).await {
            warn!(
                "[PHASE: orchestrator] [STEP: config_store] Could not record {} in {:?}: {:#}",
                mask_connection_string(&effective.connection_string()),
                store.path(),
                e
            );
            warnings.push(format!(
                "The database configuration could not be saved to the backup configuration store: {:#}",
                e
            ));
        }

        let env_path = write_env.then(|| self.settings.env_file.as_path());
        Ok(ProvisionOutcome::Provisioned {
            deployment_instructions: deployment_instructions(
                effective,
                env_path,
                context.is_containerized,
                &admin.username,
            ),
            record,
            warnings,
            env_backup,
        })
    }

    /// StorageProvisioned -> AdminCreated -> Persisted.
    async fn commit(
        &self,
        request: &ProvisionRequest,
        selection: &Selection,
        env_generated: bool,
    ) -> Result<(InitializationRecord, AdminIdentity), InitError> {
        if selection.storage.requires_schema() {
            selection.storage.initialize_schema().await?;
        }
        self.enter(InitPhase::StorageProvisioned);

        // PBKDF2 is CPU-bound; keep it off the async workers.
        let hasher = self.hasher.clone();
        let password = request.admin.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| InitError::AdminCreation(format!("Password hashing task failed: {}", e)))?
            .map_err(|e| InitError::AdminCreation(format!("Password hashing failed: {:#}", e)))?;
        let admin = selection
            .storage
            .create_user(NewUser::administrator(
                &request.admin.username,
                &request.admin.email,
                password_hash,
            ))
            .await?;
        self.enter(InitPhase::AdminCreated);

        let effective = &selection.effective;
        let record = InitializationRecord {
            is_initialized: true,
            admin_user: Some(admin.clone()),
            database: Some(DatabaseRecord {
                provider: selection.provider,
                name: request.database.display_name(effective),
                connection_string: effective.connection_string(),
                env_generated,
            }),
            deployment_context: self.state.context(),
            created_at: Some(Utc::now()),
        };
        self.state.persist(&record).await?;
        self.enter(InitPhase::Persisted);
        Ok((record, admin))
    }
}
