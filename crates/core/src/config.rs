//! Configuration types and the layered loader.

use crate::error::{CoreError, CoreResult};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides (`ORDINAL_TRACKER__DEBOUNCE_MS=...`).
pub const ENV_PREFIX: &str = "ORDINAL_";

/// Top-level configuration for the deleted-file subsystem.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Preferred storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Backends tried in order when the preferred one cannot start.
    /// An in-memory backend is always the last resort.
    #[serde(default)]
    pub fallbacks: Vec<StorageConfig>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then `ORDINAL_*` env vars.
    ///
    /// Every field has a serde default, so unset keys fall back to built-ins.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut figment = Figment::new();

        if let Some(path) = path {
            if path.exists() {
                tracing::info!(config_path = %path.display(), "Loading configuration from file");
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::debug!("No config file found at {}", path.display());
            }
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Storage backends in the order they should be attempted.
    pub fn storage_chain(&self) -> Vec<StorageConfig> {
        std::iter::once(self.storage.clone())
            .chain(self.fallbacks.iter().cloned())
            .collect()
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> CoreResult<()> {
        for storage in self.storage_chain() {
            storage.validate().map_err(CoreError::Config)?;
        }
        self.circuit_breaker.validate().map_err(CoreError::Config)?;
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local maps; nothing survives a restart.
    Memory,
    /// Namespaced key/value store persisted to a single JSON file.
    KeyValue {
        /// File holding the store.
        path: PathBuf,
        /// Prefix applied to every key.
        #[serde(default = "default_namespace")]
        namespace: String,
    },
    /// Embedded SQLite write-once log.
    Sqlite {
        /// Database file path (`:memory:` for an ephemeral database).
        path: PathBuf,
    },
}

fn default_namespace() -> String {
    "deletedFiles".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/deleted-files.db"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::KeyValue { namespace, .. } if namespace.trim().is_empty() => {
                Err("keyvalue storage requires a non-empty namespace".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Order tracker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Quiet period in milliseconds before pending changes are written.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    crate::DEFAULT_DEBOUNCE_MS
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl TrackerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Attempts allowed per window; the next one trips the breaker.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    /// Window length in seconds after which the attempt counter restarts.
    #[serde(default = "default_reset_window_secs")]
    pub reset_window_secs: u64,
}

fn default_threshold() -> u32 {
    crate::DEFAULT_BREAKER_THRESHOLD
}

fn default_reset_window_secs() -> u64 {
    crate::DEFAULT_BREAKER_WINDOW_SECS
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            reset_window_secs: default_reset_window_secs(),
        }
    }
}

impl BreakerConfig {
    pub fn reset_window(&self) -> Duration {
        Duration::from_secs(self.reset_window_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.threshold == 0 {
            return Err("circuit_breaker.threshold must be at least 1".to_string());
        }
        if self.reset_window_secs == 0 {
            return Err("circuit_breaker.reset_window_secs must be at least 1".to_string());
        }
        Ok(())
    }
}
