//! Configuration for the featureboard service.
//!
//! Loaded from TOML at `$FEATUREBOARD_CONFIG`, falling back to
//! `~/.config/featureboard/featureboard.toml`. A missing file means defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineConfig;
use crate::store::{FeatureStore, MemoryStore, SqliteStore, StoreError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureboardConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Override for the service socket; `~/` is expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub engine: EngineSection,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for FeatureboardConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            socket_path: None,
            store: StoreConfig::default(),
            engine: EngineSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String {
    "~/.local/share/featureboard/features.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Open the configured backend.
    pub fn open(&self) -> std::result::Result<Arc<dyn FeatureStore>, StoreError> {
        Ok(match self.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sqlite => Arc::new(SqliteStore::open(
                &self.resolved_db_path(),
                Duration::from_millis(self.busy_timeout_ms),
            )?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: usize,

    #[serde(default = "default_conflict_backoff_ms")]
    pub conflict_backoff_ms: u64,
}

fn default_conflict_retries() -> usize {
    3
}

fn default_conflict_backoff_ms() -> u64 {
    5
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            conflict_retries: default_conflict_retries(),
            conflict_backoff_ms: default_conflict_backoff_ms(),
        }
    }
}

impl From<&EngineSection> for EngineConfig {
    fn from(section: &EngineSection) -> Self {
        Self {
            conflict_retries: section.conflict_retries,
            conflict_backoff: Duration::from_millis(section.conflict_backoff_ms),
        }
    }
}

impl FeatureboardConfig {
    pub const ENV_CONFIG_PATH: &'static str = "FEATUREBOARD_CONFIG";
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "featureboard.toml";
    pub const MAX_CONFLICT_RETRIES: usize = 10;

    /// Load from the default location; defaults if no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            message: format!("failed to read config at {}", path.display()),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.conflict_retries > Self::MAX_CONFLICT_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "engine.conflict_retries must be <= {}, got {}",
                Self::MAX_CONFLICT_RETRIES,
                self.engine.conflict_retries
            )));
        }
        if self.store.backend == StoreBackend::Sqlite && self.store.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.db_path must not be empty for the sqlite backend".to_string(),
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid("log_filter must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn resolved_socket_path(&self) -> Option<PathBuf> {
        self.socket_path.as_deref().map(expand_home)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::from(&self.engine)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("featureboard")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}
