//! Engine configuration persisted as TOML

use std::path::{Path, PathBuf};

use tactus_core::{EngineConfig, TactusError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: TactusError,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<config dir>/tactus/config.toml`
    pub fn default_location() -> Self {
        Self::new(default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config. A missing file yields the defaults; out-of-range values are an error.
    pub fn load(&self) -> Result<EngineConfig, ConfigStoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No config file, using defaults");
                return Ok(EngineConfig::default());
            }
            Err(source) => {
                return Err(ConfigStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let config: EngineConfig = toml::from_str(&text).map_err(|source| ConfigStoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        config.validate().map_err(|source| ConfigStoreError::Invalid {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "Config loaded");
        Ok(config)
    }

    pub fn save(&self, config: &EngineConfig) -> Result<(), ConfigStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let text = toml::to_string_pretty(config)?;
        std::fs::write(&self.path, text).map_err(|source| ConfigStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "Config saved");
        Ok(())
    }
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tactus")
        .join("config.toml")
}
