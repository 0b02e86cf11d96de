//! Layered configuration for norma.
//!
//! Values are merged in this order, later layers winning:
//! 1. built-in defaults (paths under the platform data directory),
//! 2. a configuration file: either the one given explicitly, or any of
//!    `norma.toml`, `norma.yaml` and `norma.json` in the platform
//!    configuration directory,
//! 3. `NORMA_`-prefixed environment variables, with `__` separating nested
//!    keys (`NORMA_LIMITS__WORKERS=8`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use norma_storage::Compression;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "NORMA_";
pub const DEFAULT_BASE_URL: &str = "https://servicios.infoleg.gob.ar/infolegInternet/verNorma.do";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding content-addressed payload blobs.
    pub root: PathBuf,
    pub compression: Compression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file with cache metadata.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginConfig {
    pub base_url: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory the processor drains messages from.
    pub spool: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub workers: usize,
    pub fetch_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
}

impl LimitsConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub origin: OriginConfig,
    pub queue: QueueConfig,
    pub limits: LimitsConfig,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("ar", "norma", "norma")
}

impl Default for Config {
    fn default() -> Self {
        let data = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("norma"));
        Self {
            storage: StorageConfig { root: data.join("store"), compression: Compression::default() },
            database: DatabaseConfig { path: data.join("cache.sqlite") },
            origin: OriginConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                user_agent: concat!("norma/", env!("CARGO_PKG_VERSION")).to_string(),
            },
            queue: QueueConfig { spool: data.join("spool") },
            limits: LimitsConfig { workers: 4, fetch_timeout_secs: 30, dispatch_timeout_secs: 10 },
        }
    }
}

impl Config {
    /// Assemble the provider stack without extracting it.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                match path.extension().and_then(|ext| ext.to_str()) {
                    Some("toml") => figment.merge(Toml::file_exact(path)),
                    Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                    Some("json") => figment.merge(Json::file_exact(path)),
                    other => exn::bail!(ErrorKind::UnsupportedFormat(other.unwrap_or_default().to_string())),
                }
            },
            None => match project_dirs() {
                Some(dirs) => {
                    let dir = dirs.config_dir();
                    figment
                        .merge(Toml::file_exact(dir.join("norma.toml")))
                        .merge(Yaml::file_exact(dir.join("norma.yaml")))
                        .merge(Json::file_exact(dir.join("norma.json")))
                },
                None => figment,
            },
        };
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, path) in [
            ("storage.root", &self.storage.root),
            ("database.path", &self.database.path),
            ("queue.spool", &self.queue.spool),
        ] {
            if !path.is_absolute() {
                exn::bail!(ErrorKind::Invalid(format!("{field} must be an absolute path, got {}", path.display())));
            }
        }
        if !(self.origin.base_url.starts_with("http://") || self.origin.base_url.starts_with("https://")) {
            exn::bail!(ErrorKind::Invalid(format!("origin.base_url must be an http(s) URL, got {:?}", self.origin.base_url)));
        }
        if self.origin.user_agent.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("origin.user_agent must not be empty".to_string()));
        }
        if self.limits.workers == 0 {
            exn::bail!(ErrorKind::Invalid("limits.workers must be at least 1".to_string()));
        }
        if self.limits.fetch_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("limits.fetch_timeout_secs must be > 0".to_string()));
        }
        if self.limits.dispatch_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("limits.dispatch_timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }
}
