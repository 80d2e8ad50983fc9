// Response models for the status, connection-test and provisioning entry points

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::record::{AdminIdentity, DatabaseRecord};

// =========================
// Generic wrapper
// =========================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// =========================
// Connection test
// =========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
    Ok,
    MissingTables,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaValidation {
    pub has_schema: bool,
    pub missing_tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_status: Option<SchemaStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_tables: Option<Vec<String>>,
    /// Connection attempts made; zero when the config was rejected before any I/O.
    pub attempts: u32,
}

impl ConnectionTestResult {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self {
            success: false,
            latency: None,
            error: Some(message.into()),
            schema_status: None,
            missing_tables: None,
            attempts: 0,
        }
    }

    pub fn failed(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::invalid_config(message)
        }
    }

    pub fn connected(latency_ms: u64, attempts: u32, schema: Option<SchemaValidation>) -> Self {
        let (schema_status, missing_tables) = match schema {
            Some(s) if s.has_schema => (Some(SchemaStatus::Ok), None),
            Some(s) => (Some(SchemaStatus::MissingTables), Some(s.missing_tables)),
            None => (None, None),
        };
        Self {
            success: true,
            latency: Some(latency_ms),
            error: None,
            schema_status,
            missing_tables,
            attempts,
        }
    }
}

// =========================
// Provisioning
// =========================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionSuccess {
    pub success: bool,
    pub already_initialized: bool,
    pub admin_user: Option<AdminIdentity>,
    pub database: Option<DatabaseRecord>,
    pub env_generated: bool,
    #[serde(default)]
    pub deployment_instructions: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionFailure {
    pub success: bool,
    pub error: String,
    pub error_kind: String,
}

/// Result of the provisioning entry point: one branch or the other, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvisionResponse {
    Success(ProvisionSuccess),
    Failure(ProvisionFailure),
}

impl ProvisionResponse {
    pub fn failure(error: impl Into<String>, kind: &str) -> Self {
        ProvisionResponse::Failure(ProvisionFailure {
            success: false,
            error: error.into(),
            error_kind: kind.to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProvisionResponse::Success(_))
    }
}

// =========================
// Reset
// =========================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub marker_removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_backup: Option<PathBuf>,
    pub env_removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tables_keep_success_true() {
        let result = ConnectionTestResult::connected(
            12,
            1,
            Some(SchemaValidation {
                has_schema: false,
                missing_tables: vec!["users".to_string()],
            }),
        );
        assert!(result.success);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["schemaStatus"], "missing_tables");
        assert_eq!(json["missingTables"][0], "users");
    }

    #[test]
    fn failure_response_has_no_success_fields() {
        let json = serde_json::to_value(ProvisionResponse::failure("boom", "schema")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorKind"], "schema");
        assert!(json.get("adminUser").is_none());
        assert!(json.get("deploymentInstructions").is_none());
    }
}
