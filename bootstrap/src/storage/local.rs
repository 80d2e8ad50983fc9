// Local file-backed storage
//
// One JSON document holds every table. Writes go through `write_atomic`, and a process-local
// mutex serializes read-modify-write cycles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewUser, StorageCapability, UserRole};
use crate::error::InitError;
use crate::installation::files::write_atomic;
use crate::models::provider::ProviderId;
use crate::models::record::AdminIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalDocument {
    #[serde(default)]
    pub users: Vec<StoredUser>,
    #[serde(default)]
    pub sessions: Vec<Value>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

pub struct LocalFileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; an absent file is an empty document.
    pub async fn load(&self) -> anyhow::Result<LocalDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, doc: &LocalDocument) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.path, &bytes).await
    }
}

#[async_trait]
impl StorageCapability for LocalFileStorage {
    fn provider(&self) -> ProviderId {
        ProviderId::Local
    }

    fn requires_schema(&self) -> bool {
        false
    }

    async fn initialize_schema(&self) -> Result<(), InitError> {
        let _guard = self.write_lock.lock().await;
        let doc = self
            .load()
            .await
            .map_err(|e| InitError::SchemaInitialization(format!("{:#}", e)))?;
        // Re-saving normalizes a partial document to include every section.
        self.save(&doc)
            .await
            .map_err(|e| InitError::SchemaInitialization(format!("{:#}", e)))
    }

    async fn create_user(&self, user: NewUser) -> Result<AdminIdentity, InitError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self
            .load()
            .await
            .map_err(|e| {
                InitError::AdminCreation(format!("Failed to read {:?}: {:#}", self.path, e))
            })?;

        if doc
            .users
            .iter()
            .any(|u| u.username.eq_ignore_ascii_case(&user.username))
        {
            return Err(InitError::AdminCreation(format!(
                "Username '{}' already exists.",
                user.username
            )));
        }
        if doc
            .users
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(InitError::AdminCreation(format!(
                "Email '{}' is already registered.",
                user.email
            )));
        }

        let role = user.role;
        let stored = StoredUser {
            id: Uuid::new_v4().to_string(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            is_active: user.is_active,
            is_verified: user.is_verified,
            created_at: Utc::now(),
        };
        let identity = AdminIdentity {
            id: stored.id.clone(),
            username: stored.username.clone(),
            email: stored.email.clone(),
        };
        doc.users.push(stored);
        self.save(&doc)
            .await
            .map_err(|e| {
                InitError::AdminCreation(format!("Failed to write {:?}: {:#}", self.path, e))
            })?;

        info!(
            "[PHASE: storage] [STEP: create_user] Created {} account in local storage (username={})",
            role.as_str(),
            identity.username
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(name: &str, email: &str) -> NewUser {
        NewUser::administrator(name, email, "pbkdf2-sha256$1$c2FsdA$aGFzaA".to_string())
    }

    #[tokio::test]
    async fn create_user_persists_admin_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(tmp.path().join("app-db.json"));

        let identity = storage
            .create_user(admin("admin", "admin@example.com"))
            .await
            .unwrap();
        assert_eq!(identity.username, "admin");

        let doc = storage.load().await.unwrap();
        assert_eq!(doc.users.len(), 1);
        let stored = &doc.users[0];
        assert_eq!(stored.id, identity.id);
        assert_eq!(stored.role, UserRole::Admin);
        assert!(stored.is_active && stored.is_verified);
    }

    #[tokio::test]
    async fn duplicate_username_is_admin_creation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(tmp.path().join("app-db.json"));
        storage
            .create_user(admin("admin", "a@example.com"))
            .await
            .unwrap();

        let err = storage
            .create_user(admin("ADMIN", "b@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "admin-creation");
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn initialize_schema_writes_all_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("app-db.json");
        std::fs::write(&path, r#"{"users":[]}"#).unwrap();
        let storage = LocalFileStorage::new(&path);

        storage.initialize_schema().await.unwrap();
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        for table in super::super::REQUIRED_TABLES {
            assert!(raw.get(table).is_some(), "missing section {}", table);
        }
    }

    #[tokio::test]
    async fn malformed_document_is_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("app-db.json");
        std::fs::write(&path, "{ not json").unwrap();
        let storage = LocalFileStorage::new(&path);

        assert!(storage
            .create_user(admin("admin", "admin@example.com"))
            .await
            .is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
