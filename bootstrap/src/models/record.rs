// Initialization marker record
//
// The on-disk marker is exactly `InitializationRecord` serialized as camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deployment::DeploymentContext;
use super::provider::ProviderId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminIdentity {
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRecord {
    pub provider: ProviderId,
    pub name: String,
    pub connection_string: String,
    pub env_generated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationRecord {
    pub is_initialized: bool,
    #[serde(default)]
    pub admin_user: Option<AdminIdentity>,
    #[serde(default)]
    pub database: Option<DatabaseRecord>,
    #[serde(default)]
    pub deployment_context: DeploymentContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl InitializationRecord {
    /// Stub returned by status queries when no usable marker exists.
    pub fn uninitialized(context: DeploymentContext) -> Self {
        InitializationRecord {
            is_initialized: false,
            admin_user: None,
            database: None,
            deployment_context: context,
            created_at: None,
        }
    }

    /// A marker claiming initialization must carry every field a later run relies on.
    pub fn is_complete(&self) -> bool {
        !self.is_initialized
            || (self.admin_user.is_some() && self.database.is_some() && self.created_at.is_some())
    }
}
