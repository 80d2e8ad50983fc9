// Deterministic collaborators shared by unit tests.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::database::connection::{ConnectError, DbConnector};
use crate::database::provider_selector::{ProviderSelector, Selection};
use crate::error::InitError;
use crate::models::provider::{ProviderConfig, ProviderId};
use crate::models::record::AdminIdentity;
use crate::security::password::PasswordHasher;
use crate::storage::{NewUser, StorageCapability, REQUIRED_TABLES};

/// Connector that fails the first `fail_first` attempts, then succeeds.
pub struct StubConnector {
    fail_first: u32,
    transient: bool,
    tables: Option<Vec<String>>,
    connect_calls: AtomicU32,
}

impl StubConnector {
    pub fn healthy() -> Self {
        Self {
            fail_first: 0,
            transient: true,
            tables: Some(REQUIRED_TABLES.iter().map(|t| t.to_string()).collect()),
            connect_calls: AtomicU32::new(0),
        }
    }

    pub fn failing(transient: bool) -> Self {
        Self {
            fail_first: u32::MAX,
            transient,
            ..Self::healthy()
        }
    }

    pub fn flaky(failures: u32) -> Self {
        Self {
            fail_first: failures,
            ..Self::healthy()
        }
    }

    /// `None` makes table listing fail.
    pub fn with_tables(mut self, tables: Option<Vec<String>>) -> Self {
        self.tables = tables;
        self
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DbConnector for StubConnector {
    async fn connect(&self, _config: &ProviderConfig) -> Result<(), ConnectError> {
        let attempt = self.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            return Err(ConnectError {
                user_message: format!("refused on attempt {}", attempt),
                internal_details: format!("stub failure {}", attempt),
                transient: self.transient,
            });
        }
        Ok(())
    }

    async fn list_tables(&self, _config: &ProviderConfig) -> Result<Vec<String>> {
        self.tables
            .clone()
            .ok_or_else(|| anyhow::anyhow!("permission denied listing tables"))
    }
}

/// Storage that records calls and can be told to fail either step.
pub struct RecordingStorage {
    provider: ProviderId,
    requires_schema: bool,
    fail_schema: bool,
    fail_create: bool,
    schema_calls: AtomicU32,
    create_calls: AtomicU32,
}

impl RecordingStorage {
    pub fn new(provider: ProviderId, requires_schema: bool) -> Self {
        Self {
            provider,
            requires_schema,
            fail_schema: false,
            fail_create: false,
            schema_calls: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
        }
    }

    pub fn failing_schema(mut self) -> Self {
        self.fail_schema = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn schema_calls(&self) -> u32 {
        self.schema_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageCapability for RecordingStorage {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn requires_schema(&self) -> bool {
        self.requires_schema
    }

    async fn initialize_schema(&self) -> Result<(), InitError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_schema {
            return Err(InitError::SchemaInitialization(
                "permission denied to create table users".to_string(),
            ));
        }
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<AdminIdentity, InitError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_create {
            return Err(InitError::AdminCreation(format!(
                "Username '{}' already exists.",
                user.username
            )));
        }
        Ok(AdminIdentity {
            id: format!("user-{}", n),
            username: user.username,
            email: user.email,
        })
    }
}

/// Hands out the same storage for every config.
pub struct StubSelector {
    storage: Arc<RecordingStorage>,
    calls: AtomicU32,
}

impl StubSelector {
    pub fn new(storage: Arc<RecordingStorage>) -> Self {
        Self {
            storage,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderSelector for StubSelector {
    fn select(&self, config: &ProviderConfig) -> Result<Selection, InitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Selection {
            storage: self.storage.clone(),
            requested: config.provider_id(),
            provider: self.storage.provider(),
            effective: config.clone(),
            warning: None,
        })
    }
}

/// Cheap stand-in for the PBKDF2 hasher.
pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> Result<String> {
        Ok(format!("plain${}", password.len()))
    }

    fn verify(&self, password: &str, encoded: &str) -> Result<bool> {
        Ok(encoded == format!("plain${}", password.len()))
    }
}
