// Storage provider identifiers and configuration
//
// `ProviderConfig` is a closed tagged union: adding a provider means adding a variant, and every
// `match` over it (validation, selection, env rendering) must then handle it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::utils::validation::validate_database_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Local,
    Postgres,
    MySql,
    SqlServer,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Local => "local",
            ProviderId::Postgres => "postgres",
            ProviderId::MySql => "mysql",
            ProviderId::SqlServer => "sqlserver",
        }
    }

    /// Parse a provider identifier, accepting the common aliases.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "file" | "sqlite" | "json" => Some(ProviderId::Local),
            "postgres" | "postgresql" | "pg" => Some(ProviderId::Postgres),
            "mysql" | "mariadb" => Some(ProviderId::MySql),
            "sqlserver" | "mssql" | "sql_server" => Some(ProviderId::SqlServer),
            _ => None,
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            ProviderId::Local => None,
            ProviderId::Postgres => Some(5432),
            ProviderId::MySql => Some(3306),
            ProviderId::SqlServer => Some(1433),
        }
    }

    /// URL schemes accepted in a connection string for this provider.
    pub fn url_schemes(&self) -> &'static [&'static str] {
        match self {
            ProviderId::Postgres => &["postgres", "postgresql"],
            ProviderId::MySql => &["mysql", "mariadb"],
            ProviderId::Local | ProviderId::SqlServer => &[],
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings shared by the networked SQL providers.
///
/// Either `connection_string` is set, or the discrete host/credential fields are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub ssl: bool,
}

impl NetworkConfig {
    pub fn from_connection_string(provider: ProviderId, connection_string: &str) -> Self {
        NetworkConfig {
            connection_string: Some(connection_string.to_string()),
            ssl: infer_ssl(provider, connection_string).unwrap_or(false),
            ..Default::default()
        }
    }

    fn explicit_connection_string(&self) -> Option<&str> {
        non_empty(self.connection_string.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Local { path: PathBuf },
    Postgres(NetworkConfig),
    MySql(NetworkConfig),
    SqlServer(NetworkConfig),
}

impl ProviderConfig {
    pub fn provider_id(&self) -> ProviderId {
        match self {
            ProviderConfig::Local { .. } => ProviderId::Local,
            ProviderConfig::Postgres(_) => ProviderId::Postgres,
            ProviderConfig::MySql(_) => ProviderId::MySql,
            ProviderConfig::SqlServer(_) => ProviderId::SqlServer,
        }
    }

    pub fn network(&self) -> Option<&NetworkConfig> {
        match self {
            ProviderConfig::Local { .. } => None,
            ProviderConfig::Postgres(n) | ProviderConfig::MySql(n) | ProviderConfig::SqlServer(n) => {
                Some(n)
            }
        }
    }

    /// Check the variant-specific required fields. Never touches the network or filesystem.
    ///
    /// Returns all problems joined into one message.
    pub fn validate(&self) -> Result<(), String> {
        let mut problems: Vec<String> = Vec::new();
        match self {
            ProviderConfig::Local { path } => {
                if path.as_os_str().is_empty() {
                    problems.push("Local storage path is required.".to_string());
                }
            }
            ProviderConfig::Postgres(net)
            | ProviderConfig::MySql(net)
            | ProviderConfig::SqlServer(net) => {
                validate_network(self.provider_id(), net, &mut problems);
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join(" "))
        }
    }

    /// Connection string for drivers. Local storage is rendered as `file:<path>`.
    pub fn connection_string(&self) -> String {
        match self {
            ProviderConfig::Local { path } => format!("file:{}", path.display()),
            ProviderConfig::Postgres(net)
            | ProviderConfig::MySql(net)
            | ProviderConfig::SqlServer(net) => {
                if let Some(cs) = net.explicit_connection_string() {
                    return cs.trim().to_string();
                }
                build_connection_string(self.provider_id(), net)
            }
        }
    }

    /// Best-effort logical database name (file stem for local storage).
    pub fn database_name(&self) -> String {
        match self {
            ProviderConfig::Local { path } => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "local".to_string()),
            ProviderConfig::Postgres(net)
            | ProviderConfig::MySql(net)
            | ProviderConfig::SqlServer(net) => {
                if let Some(db) = non_empty(net.database.as_deref()) {
                    return db.to_string();
                }
                let cs = net.explicit_connection_string().unwrap_or_default();
                let from_cs = match self.provider_id() {
                    ProviderId::SqlServer => ado_value(cs, &["database", "initial catalog"]),
                    _ => Url::parse(cs)
                        .ok()
                        .map(|u| u.path().trim_start_matches('/').to_string())
                        .filter(|s| !s.is_empty()),
                };
                from_cs.unwrap_or_else(|| self.provider_id().as_str().to_string())
            }
        }
    }
}

fn validate_network(provider: ProviderId, net: &NetworkConfig, problems: &mut Vec<String>) {
    if let Some(cs) = net.explicit_connection_string() {
        match provider {
            ProviderId::SqlServer => {
                if ado_value(cs, &["server", "data source", "address", "addr"]).is_none() {
                    problems.push("Connection string must specify Server=.".to_string());
                }
            }
            _ => match Url::parse(cs) {
                Ok(url) => {
                    if !provider.url_schemes().contains(&url.scheme()) {
                        problems.push(format!(
                            "Connection string scheme '{}' does not match provider {}.",
                            url.scheme(),
                            provider
                        ));
                    }
                    if url.host_str().map(str::is_empty).unwrap_or(true) {
                        problems.push("Connection string must include a host.".to_string());
                    }
                }
                Err(_) => problems.push("Connection string is not a valid URL.".to_string()),
            },
        }

        if let Some(declared) = infer_ssl(provider, cs) {
            if declared != net.ssl {
                problems.push(format!(
                    "SSL flag ({}) conflicts with the connection string's SSL setting ({}).",
                    net.ssl, declared
                ));
            }
        }
        return;
    }

    let mut missing = Vec::new();
    for (name, value) in [
        ("host", &net.host),
        ("username", &net.username),
        ("password", &net.password),
        ("database", &net.database),
    ] {
        if non_empty(value.as_deref()).is_none() {
            missing.push(name);
        }
    }
    if !missing.is_empty() {
        problems.push(format!(
            "Missing required field(s) for {}: {}.",
            provider,
            missing.join(", ")
        ));
    }
    if net.port == Some(0) {
        problems.push("Port must be between 1 and 65535.".to_string());
    }
    if let Some(db) = non_empty(net.database.as_deref()) {
        if let Err(e) = validate_database_name(provider, db) {
            problems.push(e);
        }
    }
    if let Some(host) = non_empty(net.host.as_deref()) {
        if host.contains("://") {
            problems.push("Host must be a hostname, not a URL.".to_string());
        }
    }
}

fn build_connection_string(provider: ProviderId, net: &NetworkConfig) -> String {
    let host = net.host.as_deref().unwrap_or_default().trim();
    let port = net.port.or(provider.default_port()).unwrap_or_default();
    let user = net.username.as_deref().unwrap_or_default();
    let password = net.password.as_deref().unwrap_or_default();
    let database = net.database.as_deref().unwrap_or_default().trim();

    match provider {
        ProviderId::SqlServer => format!(
            "Server=tcp:{},{};Database={};User Id={};Password={};Encrypt={}",
            host, port, database, user, password, net.ssl
        ),
        ProviderId::Postgres | ProviderId::MySql => {
            let scheme = provider.url_schemes()[0];
            let Ok(mut url) = Url::parse(&format!("{}://{}:{}/", scheme, host, port)) else {
                return format!("{}://{}:{}/{}", scheme, host, port, database);
            };
            // set_username/set_password percent-encode reserved characters.
            let _ = url.set_username(user);
            let _ = url.set_password(Some(password));
            url.set_path(database);
            let (key, value) = match (provider, net.ssl) {
                (ProviderId::Postgres, true) => ("sslmode", "require"),
                (ProviderId::Postgres, false) => ("sslmode", "disable"),
                (_, true) => ("ssl-mode", "REQUIRED"),
                (_, false) => ("ssl-mode", "DISABLED"),
            };
            url.query_pairs_mut().append_pair(key, value);
            url.to_string()
        }
        ProviderId::Local => String::new(),
    }
}

/// SSL requirement declared inside a connection string, if it declares one.
pub fn infer_ssl(provider: ProviderId, connection_string: &str) -> Option<bool> {
    match provider {
        ProviderId::SqlServer => ado_value(connection_string, &["encrypt"])
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "strict" | "mandatory")),
        ProviderId::Postgres | ProviderId::MySql => {
            let url = Url::parse(connection_string).ok()?;
            let mode = url
                .query_pairs()
                .find(|(k, _)| matches!(k.as_ref(), "sslmode" | "ssl-mode" | "ssl_mode"))
                .map(|(_, v)| v.to_ascii_lowercase())?;
            match mode.as_str() {
                "disable" | "disabled" => Some(false),
                "require" | "required" | "verify-ca" | "verify_ca" | "verify-full"
                | "verify_identity" => Some(true),
                // prefer/allow do not commit either way
                _ => None,
            }
        }
        ProviderId::Local => None,
    }
}

/// Look up a key in a semicolon-separated `key=value` connection string (case-insensitive).
pub fn ado_value(connection_string: &str, keys: &[&str]) -> Option<String> {
    connection_string.split(';').find_map(|part| {
        let (k, v) = part.split_once('=')?;
        let k = k.trim().to_ascii_lowercase();
        let v = v.trim();
        if keys.contains(&k.as_str()) && !v.is_empty() {
            Some(v.to_string())
        } else {
            None
        }
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
