// Deployment environment inspection
//
// Detection works on an `EnvSnapshot`, never on ambient `std::env` lookups, so every decision is
// a pure function of the snapshot and tests can describe any deployment without touching the
// real process environment.

use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::models::deployment::{DeploymentContext, ValidationResult};
use crate::models::provider::{ado_value, NetworkConfig, ProviderConfig, ProviderId};

/// Env var: explicit provider selection.
pub const ENV_DATABASE_PROVIDER: &str = "DATABASE_PROVIDER";
/// Env var: generic connection URL (paired with `DATABASE_PROVIDER`).
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Env var: local storage file (paired with `DATABASE_PROVIDER=local`).
pub const ENV_LOCAL_DB_PATH: &str = "LOCAL_DB_PATH";

/// Env var: set by Kubernetes in every pod.
pub const ENV_KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";
/// Env var: set by podman/systemd-nspawn inside containers.
pub const ENV_CONTAINER: &str = "container";

/// Fixed detection priority.
pub const DETECTION_ORDER: [ProviderId; 4] = [
    ProviderId::Postgres,
    ProviderId::MySql,
    ProviderId::SqlServer,
    ProviderId::Local,
];

/// Provider-specific signal names.
pub struct ProviderSignals {
    /// Single-variable connection form.
    pub url_key: &'static str,
    /// Discrete form: host, user, password, database.
    pub discrete_keys: [&'static str; 4],
    pub port_key: &'static str,
    pub ssl_key: &'static str,
}

pub fn signals_for(provider: ProviderId) -> Option<ProviderSignals> {
    match provider {
        ProviderId::Postgres => Some(ProviderSignals {
            url_key: "POSTGRES_URL",
            discrete_keys: [
                "POSTGRES_HOST",
                "POSTGRES_USER",
                "POSTGRES_PASSWORD",
                "POSTGRES_DATABASE",
            ],
            port_key: "POSTGRES_PORT",
            ssl_key: "POSTGRES_SSL",
        }),
        ProviderId::MySql => Some(ProviderSignals {
            url_key: "MYSQL_URL",
            discrete_keys: ["MYSQL_HOST", "MYSQL_USER", "MYSQL_PASSWORD", "MYSQL_DATABASE"],
            port_key: "MYSQL_PORT",
            ssl_key: "MYSQL_SSL",
        }),
        ProviderId::SqlServer => Some(ProviderSignals {
            url_key: "MSSQL_CONNECTION_STRING",
            discrete_keys: ["MSSQL_HOST", "MSSQL_USER", "MSSQL_PASSWORD", "MSSQL_DATABASE"],
            port_key: "MSSQL_PORT",
            ssl_key: "MSSQL_SSL",
        }),
        ProviderId::Local => None,
    }
}

/// Point-in-time view of the process environment and local deployment markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
    is_containerized: bool,
    has_local_env_file: bool,
}

impl EnvSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn containerized(mut self, value: bool) -> Self {
        self.is_containerized = value;
        self
    }

    pub fn local_env_file(mut self, value: bool) -> Self {
        self.has_local_env_file = value;
        self
    }

    /// Trimmed, non-empty value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Source of environment snapshots.
pub trait EnvironmentSource: Send + Sync {
    fn snapshot(&self) -> EnvSnapshot;
}

/// A fixed snapshot is its own source.
impl EnvironmentSource for EnvSnapshot {
    fn snapshot(&self) -> EnvSnapshot {
        self.clone()
    }
}

/// Reads the real process environment.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    env_file: PathBuf,
}

impl ProcessEnvironment {
    pub fn new(env_file: impl Into<PathBuf>) -> Self {
        Self {
            env_file: env_file.into(),
        }
    }
}

impl EnvironmentSource for ProcessEnvironment {
    fn snapshot(&self) -> EnvSnapshot {
        // `std::env::vars` panics on non-UTF-8 entries; those can never be signals, so skip them.
        let vars: BTreeMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| match (k.into_string(), v.into_string()) {
                (Ok(k), Ok(v)) => Some((k, v)),
                (Ok(k), Err(_)) => {
                    debug!("[PHASE: environment] [STEP: snapshot] Skipping {} (value is not UTF-8)", k);
                    None
                }
                (Err(k), _) => {
                    debug!("[PHASE: environment] [STEP: snapshot] Skipping non-UTF-8 key {:?}", k);
                    None
                }
            })
            .collect();
        let is_containerized = Path::new("/.dockerenv").exists()
            || Path::new("/run/.containerenv").exists()
            || vars.contains_key(ENV_KUBERNETES_SERVICE_HOST)
            || vars.contains_key(ENV_CONTAINER);
        EnvSnapshot {
            vars,
            is_containerized,
            has_local_env_file: self.env_file.is_file(),
        }
    }
}

/// Result of checking one provider's signal set.
#[derive(Debug, Clone, Default)]
struct SignalCheck {
    config: Option<ProviderConfig>,
    present: usize,
    missing: Vec<String>,
    errors: Vec<String>,
}

/// Derive the deployment context from a snapshot.
pub fn resolve(snapshot: &EnvSnapshot) -> DeploymentContext {
    let (detected, validation) = detect(snapshot);
    DeploymentContext {
        is_containerized: snapshot.is_containerized,
        has_local_env_file: snapshot.has_local_env_file,
        detected_provider: detected.map(|c| c.provider_id()),
        env_validation: validation,
    }
}

/// Provider config fully described by the environment, if any.
pub fn resolve_provider_config(snapshot: &EnvSnapshot) -> Option<ProviderConfig> {
    detect(snapshot).0
}

fn detect(snapshot: &EnvSnapshot) -> (Option<ProviderConfig>, Option<ValidationResult>) {
    let mut best_partial: Option<(ProviderId, SignalCheck)> = None;

    for provider in DETECTION_ORDER {
        let check = check_provider(provider, snapshot);
        if let Some(config) = check.config {
            let validation = ValidationResult {
                is_valid: true,
                provider: Some(provider),
                missing: Vec::new(),
                errors: Vec::new(),
            };
            return (Some(config), Some(validation));
        }
        let better = match &best_partial {
            None => check.present > 0,
            Some((_, best)) => check.present > best.present,
        };
        if better {
            best_partial = Some((provider, check));
        }
    }

    // Partial or malformed signals are reported, never guessed from.
    let validation = best_partial.map(|(provider, check)| ValidationResult {
        is_valid: false,
        provider: Some(provider),
        missing: check.missing,
        errors: check.errors,
    });
    (None, validation)
}

fn check_provider(provider: ProviderId, snapshot: &EnvSnapshot) -> SignalCheck {
    let mut check = SignalCheck::default();
    let declared = snapshot.get(ENV_DATABASE_PROVIDER).and_then(ProviderId::parse);

    let Some(signals) = signals_for(provider) else {
        // Local storage is only ever selected explicitly.
        if declared == Some(ProviderId::Local) {
            check.present += 1;
            match snapshot.get(ENV_LOCAL_DB_PATH) {
                Some(path) => {
                    check.config = Some(ProviderConfig::Local {
                        path: PathBuf::from(path),
                    })
                }
                None => check.missing.push(ENV_LOCAL_DB_PATH.to_string()),
            }
        }
        return check;
    };

    // Generic pair: DATABASE_PROVIDER=<provider> + DATABASE_URL.
    if declared == Some(provider) {
        check.present += 1;
        match snapshot.get(ENV_DATABASE_URL) {
            Some(url) => {
                check.present += 1;
                match url_config(provider, url) {
                    Ok(config) => {
                        check.config = Some(config);
                        return check;
                    }
                    Err(e) => check.errors.push(format!("{}: {}", ENV_DATABASE_URL, e)),
                }
            }
            None => check.missing.push(ENV_DATABASE_URL.to_string()),
        }
    }

    if let Some(url) = snapshot.get(signals.url_key) {
        check.present += 1;
        match url_config(provider, url) {
            Ok(config) => {
                check.config = Some(config);
                return check;
            }
            Err(e) => check.errors.push(format!("{}: {}", signals.url_key, e)),
        }
    }

    let present: Vec<&str> = signals
        .discrete_keys
        .iter()
        .filter(|k| snapshot.get(k).is_some())
        .copied()
        .collect();
    if present.is_empty() {
        return check;
    }
    check.present += present.len();

    let missing: Vec<String> = signals
        .discrete_keys
        .iter()
        .filter(|k| snapshot.get(k).is_none())
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        check.missing.extend(missing);
        return check;
    }

    let port = match snapshot.get(signals.port_key) {
        Some(raw) => match raw.parse::<u16>() {
            Ok(p) if p > 0 => Some(p),
            _ => {
                check
                    .errors
                    .push(format!("{}: '{}' is not a valid port", signals.port_key, raw));
                return check;
            }
        },
        None => None,
    };
    let [host, user, password, database] = signals.discrete_keys.map(|k| snapshot.get(k).map(str::to_string));
    let net = NetworkConfig {
        connection_string: None,
        host,
        port,
        username: user,
        password,
        database,
        ssl: snapshot
            .get(signals.ssl_key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "require"))
            .unwrap_or(false),
    };
    let config = network_variant(provider, net);
    match config.validate() {
        Ok(()) => check.config = Some(config),
        Err(e) => check.errors.push(e),
    }
    check
}

fn url_config(provider: ProviderId, value: &str) -> Result<ProviderConfig, String> {
    match provider {
        ProviderId::SqlServer => {
            if ado_value(value, &["server", "data source", "address", "addr"]).is_none() {
                return Err("connection string has no Server= entry".to_string());
            }
        }
        _ => {
            let url = Url::parse(value).map_err(|_| "not a valid URL".to_string())?;
            if !provider.url_schemes().contains(&url.scheme()) {
                return Err(format!("scheme '{}' does not match {}", url.scheme(), provider));
            }
        }
    }
    let config = network_variant(provider, NetworkConfig::from_connection_string(provider, value));
    config.validate()?;
    Ok(config)
}

fn network_variant(provider: ProviderId, net: NetworkConfig) -> ProviderConfig {
    match provider {
        ProviderId::Postgres => ProviderConfig::Postgres(net),
        ProviderId::MySql => ProviderConfig::MySql(net),
        ProviderId::SqlServer => ProviderConfig::SqlServer(net),
        // Not reachable from signal detection; local has no network form.
        ProviderId::Local => ProviderConfig::Local {
            path: PathBuf::new(),
        },
    }
}
