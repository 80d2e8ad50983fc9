// Storage capabilities consumed by the orchestrator
//
// The engine needs exactly two things from a storage backend: optional schema setup and
// administrator account creation. Concrete backends are a closed set (`StorageBackend`).

pub mod local;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InitError;
use crate::models::provider::ProviderId;
use crate::models::record::AdminIdentity;

pub use local::LocalFileStorage;
pub use postgres::PostgresStorage;

/// Tables (or document sections) every backend must provide.
pub const REQUIRED_TABLES: [&str; 3] = ["users", "sessions", "settings"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }
}

/// Account creation payload. The password arrives already hashed.
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_verified: bool,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .field("is_verified", &self.is_verified)
            .finish_non_exhaustive()
    }
}

impl NewUser {
    /// Administrator accounts are created pre-activated and pre-verified.
    pub fn administrator(username: &str, email: &str, password_hash: String) -> Self {
        NewUser {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password_hash,
            role: UserRole::Admin,
            is_active: true,
            is_verified: true,
        }
    }
}

#[async_trait]
pub trait StorageCapability: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Whether `initialize_schema` must run before accounts can be created.
    fn requires_schema(&self) -> bool;

    /// Create required schema objects. All-or-nothing; fails with `SchemaInitialization`.
    async fn initialize_schema(&self) -> Result<(), InitError>;

    /// Create an account; fails with `AdminCreation` (e.g. duplicate username).
    async fn create_user(&self, user: NewUser) -> Result<AdminIdentity, InitError>;
}

/// Concrete backends with full support.
pub enum StorageBackend {
    LocalFile(LocalFileStorage),
    Postgres(PostgresStorage),
}

#[async_trait]
impl StorageCapability for StorageBackend {
    fn provider(&self) -> ProviderId {
        match self {
            StorageBackend::LocalFile(s) => s.provider(),
            StorageBackend::Postgres(s) => s.provider(),
        }
    }

    fn requires_schema(&self) -> bool {
        match self {
            StorageBackend::LocalFile(s) => s.requires_schema(),
            StorageBackend::Postgres(s) => s.requires_schema(),
        }
    }

    async fn initialize_schema(&self) -> Result<(), InitError> {
        match self {
            StorageBackend::LocalFile(s) => s.initialize_schema().await,
            StorageBackend::Postgres(s) => s.initialize_schema().await,
        }
    }

    async fn create_user(&self, user: NewUser) -> Result<AdminIdentity, InitError> {
        match self {
            StorageBackend::LocalFile(s) => s.create_user(user).await,
            StorageBackend::Postgres(s) => s.create_user(user).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_is_active_and_verified() {
        let user = NewUser::administrator(" admin ", "admin@example.com", "hash".to_string());
        assert_eq!(user.username, "admin");
        assert_eq!(user.role, UserRole::Admin);
        assert!(user.is_active && user.is_verified);
        assert!(!format!("{:?}", user).contains("hash"));
    }
}
