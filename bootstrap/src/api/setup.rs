// Setup API entry points
//
// Thin adapters over the orchestrator. None of these return `Err`: failures become structured
// responses, and every connection string leaving this module is masked.

use log::{info, warn};
use std::time::Instant;
use uuid::Uuid;

use crate::database::config_store::DatabaseConfigSummary;
use crate::installation::orchestrator::{Orchestrator, ProvisionOutcome};
use crate::models::record::InitializationRecord;
use crate::models::requests::{DatabaseRequest, ProvisionRequest};
use crate::models::responses::{
    ApiResponse, ConnectionTestResult, ProvisionResponse, ProvisionSuccess, ResetOutcome,
};
use crate::utils::logging::mask_connection_string;

fn correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn masked(mut record: InitializationRecord) -> InitializationRecord {
    if let Some(db) = record.database.as_mut() {
        db.connection_string = mask_connection_string(&db.connection_string);
    }
    record
}

// =========================
// Status
// =========================

pub async fn is_initialized(orchestrator: &Orchestrator) -> bool {
    let decision = orchestrator.state().decide().await;
    info!(
        "[PHASE: setup] [STEP: is_initialized] initialized={} decided_by={:?}",
        decision.initialized,
        decision.decided_by.map(|c| c.name())
    );
    decision.initialized
}

/// Current record (or an uninitialized stub) with the connection string masked.
pub async fn get_status(orchestrator: &Orchestrator) -> ApiResponse<InitializationRecord> {
    ApiResponse::ok(masked(orchestrator.state().status().await))
}

// =========================
// Provisioning
// =========================

pub async fn provision(
    orchestrator: &Orchestrator,
    payload: Option<ProvisionRequest>,
) -> ProvisionResponse {
    let started = Instant::now();
    let correlation_id = correlation_id();
    info!(
        "[PHASE: setup] [STEP: provision] provision entered (correlation_id={})",
        correlation_id
    );

    let Some(request) = payload else {
        return ProvisionResponse::failure("Invalid request: body is required", "validation");
    };

    let response = match orchestrator.provision(&request).await {
        Ok(outcome) => to_response(outcome),
        Err(e) => ProvisionResponse::failure(e.to_string(), e.kind()),
    };

    info!(
        "[PHASE: setup] [STEP: provision] provision finished (correlation_id={}, success={}, duration_ms={})",
        correlation_id,
        response.is_success(),
        started.elapsed().as_millis()
    );
    response
}

fn to_response(outcome: ProvisionOutcome) -> ProvisionResponse {
    match outcome {
        ProvisionOutcome::AlreadyInitialized(record) => {
            let record = masked(record);
            ProvisionResponse::Success(ProvisionSuccess {
                success: true,
                already_initialized: true,
                env_generated: record
                    .database
                    .as_ref()
                    .map(|d| d.env_generated)
                    .unwrap_or(false),
                admin_user: record.admin_user,
                database: record.database,
                deployment_instructions: Vec::new(),
                warnings: vec![
                    "The application is already initialized; no changes were made.".to_string(),
                ],
            })
        }
        ProvisionOutcome::Provisioned {
            record,
            mut warnings,
            deployment_instructions,
            env_backup,
        } => {
            if let Some(backup) = env_backup {
                warnings.push(format!(
                    "The previous environment file was backed up to {}.",
                    backup.display()
                ));
            }
            let record = masked(record);
            ProvisionResponse::Success(ProvisionSuccess {
                success: true,
                already_initialized: false,
                env_generated: record
                    .database
                    .as_ref()
                    .map(|d| d.env_generated)
                    .unwrap_or(false),
                admin_user: record.admin_user,
                database: record.database,
                deployment_instructions,
                warnings,
            })
        }
    }
}

// =========================
// Reset
// =========================

/// Remove the marker (backing up any env file first). Development and test use only.
pub async fn reset(orchestrator: &Orchestrator) -> ApiResponse<ResetOutcome> {
    let correlation_id = correlation_id();
    warn!(
        "[PHASE: setup] [STEP: reset] reset requested (correlation_id={})",
        correlation_id
    );
    if orchestrator.state().context().has_valid_environment_provider() {
        warn!(
            "[PHASE: setup] [STEP: reset] The environment still configures a provider; the application will keep reporting as initialized"
        );
    }
    match orchestrator.state().reset().await {
        Ok(outcome) => ApiResponse::ok(outcome),
        Err(e) => {
            warn!(
                "[PHASE: setup] [STEP: reset] reset failed (correlation_id={}): {}",
                correlation_id, e
            );
            ApiResponse::fail(e.to_string())
        }
    }
}

// =========================
// Connection test / configs
// =========================

pub async fn test_database_connection(
    orchestrator: &Orchestrator,
    payload: Option<DatabaseRequest>,
) -> ApiResponse<ConnectionTestResult> {
    let correlation_id = correlation_id();
    let Some(request) = payload else {
        return ApiResponse::fail("Invalid request: body is required");
    };

    let (config, warning) = request.to_provider_config(&orchestrator.settings().local_db_path());
    if let Some(w) = warning {
        warn!("[PHASE: setup] [STEP: test_connection] {}", w);
    }
    info!(
        "[PHASE: setup] [STEP: test_connection] Testing {} (correlation_id={}, masked_conn_str={})",
        config.provider_id(),
        correlation_id,
        mask_connection_string(&config.connection_string())
    );

    // A failed test is still a well-formed answer; `success` in the body carries the verdict.
    ApiResponse::ok(orchestrator.verifier().test_connection(&config).await)
}

pub async fn list_database_configs(
    orchestrator: &Orchestrator,
) -> ApiResponse<Vec<DatabaseConfigSummary>> {
    match orchestrator.config_store().list().await {
        Ok(list) => ApiResponse::ok(list),
        Err(e) => {
            warn!(
                "[PHASE: setup] [STEP: list_configs] Failed to read configuration store: {:#}",
                e
            );
            ApiResponse::fail("Unable to read the database configuration store.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvSnapshot;
    use crate::models::provider::{NetworkConfig, ProviderId};
    use crate::models::requests::AdminRequest;
    use crate::settings::Settings;
    use crate::testing::{PlainHasher, RecordingStorage, StubConnector, StubSelector};
    use std::path::Path;
    use std::sync::Arc;

    fn orchestrator(dir: &Path, env: EnvSnapshot, connector: StubConnector) -> Orchestrator {
        let storage = Arc::new(RecordingStorage::new(ProviderId::Postgres, true));
        Orchestrator::new(
            Settings {
                retry_base_delay_ms: 1,
                retry_max_delay_ms: 2,
                ..Settings::rooted_at(dir)
            },
            Arc::new(env),
            Arc::new(connector),
            Arc::new(StubSelector::new(storage)),
            Arc::new(PlainHasher),
        )
    }

    fn postgres_db() -> DatabaseRequest {
        DatabaseRequest {
            provider: "postgres".to_string(),
            network: NetworkConfig::from_connection_string(
                ProviderId::Postgres,
                "postgres://app_owner:hunter2hunter2@db:5432/app",
            ),
            ..Default::default()
        }
    }

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            admin: AdminRequest {
                username: "admin".to_string(),
                email: "admin@example.com".to_string(),
                password: "s3cure-passw0rd".to_string(),
            },
            database: postgres_db(),
            generate_env_file: false,
            use_existing_config: false,
        }
    }

    #[tokio::test]
    async fn provision_success_masks_connection_string() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(tmp.path(), EnvSnapshot::new(), StubConnector::healthy());

        let response = provision(&o, Some(request())).await;
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["alreadyInitialized"], false);
        assert_eq!(json["adminUser"]["username"], "admin");
        let cs = json["database"]["connectionString"].as_str().unwrap();
        assert!(!cs.contains("hunter2"), "{}", cs);
        assert!(json.get("errorKind").is_none());

        let list = list_database_configs(&o).await.data.unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].is_active);
        assert!(!list[0].connection_string.contains("hunter2"));
    }

    #[tokio::test]
    async fn provision_failure_carries_kind_only() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(tmp.path(), EnvSnapshot::new(), StubConnector::failing(false));

        let json = serde_json::to_value(provision(&o, Some(request())).await).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["errorKind"], "connection");
        assert!(json.get("adminUser").is_none());
        assert!(!is_initialized(&o).await);
    }

    #[tokio::test]
    async fn missing_body_is_a_validation_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(tmp.path(), EnvSnapshot::new(), StubConnector::healthy());
        match provision(&o, None).await {
            ProvisionResponse::Failure(f) => assert_eq!(f.error_kind, "validation"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!test_database_connection(&o, None).await.success);
    }

    #[tokio::test]
    async fn second_provision_reports_already_initialized() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(tmp.path(), EnvSnapshot::new(), StubConnector::healthy());
        assert!(provision(&o, Some(request())).await.is_success());

        match provision(&o, Some(request())).await {
            ProvisionResponse::Success(s) => {
                assert!(s.already_initialized);
                assert!(s.deployment_instructions.is_empty());
                assert_eq!(s.admin_user.unwrap().username, "admin");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn status_never_fails_on_malformed_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(tmp.path(), EnvSnapshot::new(), StubConnector::healthy());
        let marker = o.settings().marker_path();
        std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
        std::fs::write(&marker, "not json").unwrap();

        let status = get_status(&o).await;
        assert!(status.success);
        assert!(!status.data.unwrap().is_initialized);
        assert!(!is_initialized(&o).await);
    }

    #[tokio::test]
    async fn environment_status_is_masked() {
        let tmp = tempfile::tempdir().unwrap();
        let env = EnvSnapshot::new()
            .with_var("POSTGRES_URL", "postgres://app_owner:hunter2hunter2@db:5432/app");
        let o = orchestrator(tmp.path(), env, StubConnector::healthy());

        assert!(is_initialized(&o).await);
        let record = get_status(&o).await.data.unwrap();
        let db = record.database.unwrap();
        assert_eq!(db.provider, ProviderId::Postgres);
        assert!(!db.connection_string.contains("hunter2"));

        let list = list_database_configs(&o).await.data.unwrap();
        assert!(list[0].from_environment);
    }

    #[tokio::test]
    async fn connection_test_reports_retries_and_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(
            tmp.path(),
            EnvSnapshot::new(),
            StubConnector::flaky(1).with_tables(Some(vec!["users".to_string()])),
        );

        let result = test_database_connection(&o, Some(postgres_db()))
            .await
            .data
            .unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(
            result.missing_tables,
            Some(vec!["sessions".to_string(), "settings".to_string()])
        );
    }

    #[tokio::test]
    async fn reset_then_provision_again() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(tmp.path(), EnvSnapshot::new(), StubConnector::healthy());
        assert!(provision(&o, Some(request())).await.is_success());

        let outcome = reset(&o).await.data.unwrap();
        assert!(outcome.marker_removed);
        assert!(!is_initialized(&o).await);

        match provision(&o, Some(request())).await {
            ProvisionResponse::Success(s) => assert!(!s.already_initialized),
            other => panic!("expected success, got {:?}", other),
        }
    }
}
