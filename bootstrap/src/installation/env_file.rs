// Environment file generation
//
// The generated file uses exactly the signal keys the environment resolver detects, so a
// restarted process that loads it is recognized as initialized from the environment alone.

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

use crate::environment::{signals_for, ENV_DATABASE_PROVIDER, ENV_LOCAL_DB_PATH};
use crate::installation::files::{backup_file, write_atomic};
use crate::models::provider::ProviderConfig;

/// `KEY=value` pairs describing `config`, in file order.
pub fn env_entries(config: &ProviderConfig) -> Vec<(String, String)> {
    let provider = config.provider_id();
    let mut entries = vec![(ENV_DATABASE_PROVIDER.to_string(), provider.as_str().to_string())];
    match config {
        ProviderConfig::Local { path } => {
            entries.push((ENV_LOCAL_DB_PATH.to_string(), path.display().to_string()));
        }
        ProviderConfig::Postgres(_) | ProviderConfig::MySql(_) | ProviderConfig::SqlServer(_) => {
            if let Some(signals) = signals_for(provider) {
                entries.push((signals.url_key.to_string(), config.connection_string()));
            }
        }
    }
    entries
}

fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '$' | '\\' | '`'));
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('`', "\\`");
    format!("\"{}\"", escaped)
}

pub fn render(config: &ProviderConfig) -> String {
    let mut out = format!(
        "# Generated by app-bootstrap on {}\n# Contains credentials: keep this file private.\n",
        chrono::Utc::now().to_rfc3339()
    );
    for (key, value) in env_entries(config) {
        out.push_str(&format!("{}={}\n", key, quote(&value)));
    }
    out
}

/// Write the env file for `config`, backing up an existing file first.
///
/// Returns the backup path when a previous file was preserved.
pub async fn write_env_file(path: &Path, config: &ProviderConfig) -> Result<Option<PathBuf>> {
    let backup = if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let backup = backup_file(path)
            .await
            .with_context(|| format!("Refusing to overwrite {:?}: backup failed", path))?;
        info!(
            "[PHASE: env_file] [STEP: backup] Backed up {:?} to {:?}",
            path, backup
        );
        Some(backup)
    } else {
        None
    };

    write_atomic(path, render(config).as_bytes()).await?;
    restrict_to_owner(path).await;
    info!(
        "[PHASE: env_file] [STEP: write] Wrote {:?} for provider {}",
        path,
        config.provider_id()
    );
    Ok(backup)
}

/// Undo `write_env_file`: put the backup's contents back, or remove the file when there was
/// nothing before it. The backup itself is kept.
pub async fn restore_env_file(path: &Path, backup: Option<&Path>) -> Result<()> {
    match backup {
        Some(backup) => {
            let bytes = tokio::fs::read(backup)
                .await
                .with_context(|| format!("Failed to read backup {:?}", backup))?;
            write_atomic(path, &bytes).await?;
            restrict_to_owner(path).await;
            info!(
                "[PHASE: env_file] [STEP: restore] Restored {:?} from {:?}",
                path, backup
            );
        }
        None => match tokio::fs::remove_file(path).await {
            Ok(()) => info!("[PHASE: env_file] [STEP: restore] Removed {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {:?}", path)),
        },
    }
    Ok(())
}

async fn restrict_to_owner(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Follow-up steps for the operator after a successful provision.
pub fn deployment_instructions(
    config: &ProviderConfig,
    env_file: Option<&Path>,
    is_containerized: bool,
    admin_username: &str,
) -> Vec<String> {
    let mut steps = Vec::new();
    match env_file {
        Some(path) => {
            steps.push(format!(
                "Database settings were written to {}. Restart the application so it loads them.",
                path.display()
            ));
            if is_containerized {
                steps.push(format!(
                    "Running in a container: pass the variables to the container runtime (for example `--env-file {}`) so they survive image rebuilds.",
                    path.display()
                ));
            }
        }
        None => {
            let keys: Vec<String> = env_entries(config).into_iter().map(|(k, _)| k).collect();
            steps.push(format!(
                "No environment file was generated. Make sure {} are set in the deployment environment.",
                keys.join(" and ")
            ));
        }
    }
    if let ProviderConfig::Local { path } = config {
        steps.push(format!(
            "Administrator data lives in {}. Include this file in your backups.",
            path.display()
        ));
    }
    steps.push(format!(
        "Sign in as '{}' to finish configuring the application.",
        admin_username
    ));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{resolve_provider_config, EnvSnapshot};
    use crate::models::provider::{NetworkConfig, ProviderId};

    fn pg() -> ProviderConfig {
        ProviderConfig::Postgres(NetworkConfig::from_connection_string(
            ProviderId::Postgres,
            "postgres://app:s3cret@db:5432/app",
        ))
    }

    /// Minimal parser for the lines `render` produces.
    fn parse(rendered: &str) -> EnvSnapshot {
        rendered
            .lines()
            .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
            .filter_map(|l| l.split_once('='))
            .fold(EnvSnapshot::new(), |snap, (k, v)| {
                let v = v
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .map(|v| v.replace("\\\"", "\"").replace("\\$", "$").replace("\\\\", "\\"))
                    .unwrap_or_else(|| v.to_string());
                snap.with_var(k, &v)
            })
    }

    #[test]
    fn rendered_file_is_detected_by_resolver() {
        let config = pg();
        let detected = resolve_provider_config(&parse(&render(&config))).unwrap();
        assert_eq!(detected.provider_id(), ProviderId::Postgres);
        assert_eq!(detected.connection_string(), config.connection_string());
    }

    #[test]
    fn local_config_renders_provider_and_path() {
        let config = ProviderConfig::Local {
            path: PathBuf::from("/srv/app data/db.json"),
        };
        let rendered = render(&config);
        assert!(rendered.contains("DATABASE_PROVIDER=local\n"));
        assert!(rendered.contains("LOCAL_DB_PATH=\"/srv/app data/db.json\"\n"));
        assert_eq!(
            resolve_provider_config(&parse(&rendered)),
            Some(config)
        );
    }

    #[test]
    fn sqlserver_uses_connection_string_key() {
        let config = ProviderConfig::SqlServer(NetworkConfig::from_connection_string(
            ProviderId::SqlServer,
            "Server=tcp:db,1433;Database=app;User Id=sa;Password=x;",
        ));
        let keys: Vec<String> = env_entries(&config).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["DATABASE_PROVIDER", "MSSQL_CONNECTION_STRING"]);
    }

    #[tokio::test]
    async fn existing_file_is_backed_up_before_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "OLD=1\n").unwrap();

        let backup = write_env_file(&path, &pg()).await.unwrap().unwrap();

        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "OLD=1\n");
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("POSTGRES_URL=postgres://app:s3cret@db:5432/app"));
    }

    #[tokio::test]
    async fn fresh_file_has_no_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        assert!(write_env_file(&path, &pg()).await.unwrap().is_none());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn restore_puts_previous_file_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "OLD=1\n").unwrap();
        let backup = write_env_file(&path, &pg()).await.unwrap();

        restore_env_file(&path, backup.as_deref()).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "OLD=1\n");
        assert!(backup.unwrap().exists());
    }

    #[tokio::test]
    async fn restore_without_backup_removes_generated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        write_env_file(&path, &pg()).await.unwrap();

        restore_env_file(&path, None).await.unwrap();
        assert!(!path.exists());
        // Idempotent once the file is gone.
        restore_env_file(&path, None).await.unwrap();
    }

    #[test]
    fn instructions_mention_env_vars_when_no_file_written() {
        let steps = deployment_instructions(&pg(), None, false, "admin");
        assert!(steps[0].contains("DATABASE_PROVIDER and POSTGRES_URL"));
        assert!(steps.last().unwrap().contains("'admin'"));
    }

    #[test]
    fn container_instructions_include_env_file_hint() {
        let steps = deployment_instructions(&pg(), Some(Path::new("/app/.env")), true, "admin");
        assert!(steps.iter().any(|s| s.contains("--env-file /app/.env")));
    }
}
