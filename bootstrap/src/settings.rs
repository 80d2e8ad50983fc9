// Engine settings
//
// Layering (later wins): built-in defaults -> optional `bootstrap.toml` -> `APP_BOOTSTRAP_*`
// environment variables (e.g. `APP_BOOTSTRAP_MAX_ATTEMPTS=5`).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::path_resolver::{anchor, resolve_base_folder};

pub const SETTINGS_FILE: &str = "bootstrap.toml";
pub const ENV_PREFIX: &str = "APP_BOOTSTRAP";

pub const MARKER_FILE: &str = "initialization.json";
pub const CONFIGS_FILE: &str = "database-configs.json";
pub const LOCK_FILE: &str = "initialization.lock";
pub const LOCAL_DB_FILE: &str = "app-db.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub env_file: PathBuf,
    pub max_attempts: u32,
    pub connect_timeout_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub lock_stale_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from("data"),
            log_dir: None,
            log_level: "info".to_string(),
            env_file: PathBuf::from(".env"),
            max_attempts: 3,
            connect_timeout_ms: 20_000,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            lock_stale_secs: 600,
        }
    }
}

impl Settings {
    /// Load settings from `bootstrap.toml` in the working directory plus the environment.
    pub fn load() -> Result<Self> {
        let base = resolve_base_folder();
        Self::load_from(&base.join(SETTINGS_FILE))?.anchored(&base)
    }

    /// Load settings with an explicit settings file (which may be absent).
    pub fn load_from(path: &Path) -> Result<Self> {
        let defaults = Config::try_from(&Settings::default())
            .context("Failed to build default settings")?;
        Config::builder()
            .add_source(defaults)
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Failed to load settings from {:?}", path))?
            .try_deserialize()
            .context("Invalid settings")
    }

    /// Resolve relative paths against `base`.
    pub fn anchored(mut self, base: &Path) -> Result<Self> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        self.data_dir = anchor(base, &self.data_dir);
        self.env_file = anchor(base, &self.env_file);
        self.log_dir = self.log_dir.map(|d| anchor(base, &d));
        Ok(self)
    }

    /// Settings rooted at `dir` (data in `dir/data`, env file `dir/.env`). Used by tests and
    /// embedders that manage their own directories.
    pub fn rooted_at(dir: &Path) -> Self {
        Settings {
            data_dir: dir.join("data"),
            env_file: dir.join(".env"),
            ..Default::default()
        }
    }

    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join(MARKER_FILE)
    }

    pub fn configs_path(&self) -> PathBuf {
        self.data_dir.join(CONFIGS_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }

    /// Default file for the local provider, also used as the fallback target.
    pub fn local_db_path(&self) -> PathBuf {
        self.data_dir.join(LOCAL_DB_FILE)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }

    /// Effective settings rendered as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render settings as TOML")
    }
}
