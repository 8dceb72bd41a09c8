//! Configuration file (`pinwheel.yaml`)
//!
//! Every section is optional; missing values fall back to defaults under
//! the user's data directory. Relative paths resolve against `data_dir`.

use crate::pipeline::PollPolicy;
use crate::queue::BrokerOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// `<data dir>/pinwheel`, falling back to `~/.local/share/pinwheel`.
pub fn default_data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("pinwheel")
}

/// `<config dir>/pinwheel/pinwheel.yaml`, used when no `--config` is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pinwheel").join("pinwheel.yaml"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub queue: QueueConfig,
    pub workers: WorkerConfig,
    pub catalog: CatalogConfig,
    pub artifacts: ArtifactConfig,
    pub http: HttpConfig,
    /// `tracing` filter level; CLI flags take precedence
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
            catalog: CatalogConfig::default(),
            artifacts: ArtifactConfig::default(),
            http: HttpConfig::default(),
            log_level: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Broker database; defaults to `<data_dir>/queues.db`
    pub path: Option<PathBuf>,
    pub lease_secs: u64,
    pub max_deliveries: u32,
    pub receive_timeout_ms: u64,
    pub receive_poll_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: None,
            lease_secs: 60,
            max_deliveries: 10,
            receive_timeout_ms: 5_000,
            receive_poll_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub idle_backoff_ms: u64,
    pub ingest_instances: usize,
    pub inference_instances: usize,
    pub egress_instances: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: 10_000,
            ingest_instances: 1,
            inference_instances: 1,
            egress_instances: 1,
        }
    }
}

/// Where accounts and models are registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CatalogConfig {
    /// Defaults to `<data_dir>/catalog.db`
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// A read-only YAML document loaded at startup
    File { path: PathBuf },
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::Sqlite { path: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Defaults to `<data_dir>/artifacts`
    pub dir: Option<PathBuf>,
    pub delete_after_delivery: bool,
    pub cleanup_capacity: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: None,
            delete_after_delivery: true,
            cleanup_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Load the explicit file if given, else the default location if it
    /// exists, else built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.queue.lease_secs == 0 {
            return Err(ConfigError::Invalid("queue.lease_secs must be positive".into()));
        }
        if self.queue.max_deliveries == 0 {
            return Err(ConfigError::Invalid("queue.max_deliveries must be positive".into()));
        }
        if self.queue.receive_poll_ms == 0 {
            return Err(ConfigError::Invalid("queue.receive_poll_ms must be positive".into()));
        }
        Ok(())
    }

    fn resolve(&self, path: Option<&PathBuf>, default_name: &str) -> PathBuf {
        match path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.data_dir.join(p),
            None => self.data_dir.join(default_name),
        }
    }

    pub fn queue_path(&self) -> PathBuf {
        self.resolve(self.queue.path.as_ref(), "queues.db")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.resolve(self.artifacts.dir.as_ref(), "artifacts")
    }

    /// Path of the SQLite catalog, or `None` for a file catalog.
    pub fn catalog_db_path(&self) -> Option<PathBuf> {
        match &self.catalog {
            CatalogConfig::Sqlite { path } => Some(self.resolve(path.as_ref(), "catalog.db")),
            CatalogConfig::File { .. } => None,
        }
    }

    pub fn catalog_file_path(&self) -> Option<PathBuf> {
        match &self.catalog {
            CatalogConfig::File { path } => Some(self.resolve(Some(path), "")),
            CatalogConfig::Sqlite { .. } => None,
        }
    }

    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            lease: Duration::from_secs(self.queue.lease_secs),
            max_deliveries: self.queue.max_deliveries,
            receive_poll: Duration::from_millis(self.queue.receive_poll_ms),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            receive_timeout: Duration::from_millis(self.queue.receive_timeout_ms),
            idle_backoff: Duration::from_millis(self.workers.idle_backoff_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}
