// Error types for the initialization engine
//
// Every failure the orchestration can produce maps to exactly one variant so callers can tell
// "nothing happened" (validation/connection) apart from "an administrator may already exist"
// (persistence).

/// Errors surfaced by the initialization engine.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// Structurally invalid provider config or admin request. No network I/O was attempted.
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// Network/auth failure after retries were exhausted.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Schema initialization failed: {0}")]
    SchemaInitialization(String),

    #[error("Administrator account creation failed: {0}")]
    AdminCreation(String),

    #[error(
        "Initialization record could not be persisted; an administrator account may already exist: {0}"
    )]
    Persistence(String),

    #[error("Reset failed: {0}")]
    Reset(String),

    #[error("Initialization already in progress: {0}")]
    Locked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InitError {
    /// Stable machine-readable kind, used in API responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InitError::Validation(_) => "validation",
            InitError::Connection(_) => "connection",
            InitError::SchemaInitialization(_) => "schema",
            InitError::AdminCreation(_) => "admin-creation",
            InitError::Persistence(_) => "persist",
            InitError::Reset(_) => "reset",
            InitError::Locked(_) => "locked",
            InitError::Io(_) => "io",
            InitError::Json(_) => "json",
        }
    }
}

pub type InitResult<T> = Result<T, InitError>;
