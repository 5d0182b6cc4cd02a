//! Where configuration comes from.

use crate::error::ConfigError;
use crate::topology::PlatformConfig;
use crate::{CONFIG_ENV, DEFAULT_CONFIG_PATH};
use std::path::{Path, PathBuf};

/// Read-only provider of host configuration.
///
/// Implementations are queried once per backend resolution, so a source
/// may pick up changes between connects.
pub trait ConfigSource: Send + Sync {
    /// Produce the current configuration.
    fn load(&self) -> Result<PlatformConfig, ConfigError>;

    /// Short description used in logs.
    fn describe(&self) -> String;
}

/// Configuration stored in a TOML or JSON file.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File named by `MDMCLI_CONFIG`, or the platform default.
    pub fn from_env() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<PlatformConfig, ConfigError> {
        load_config(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Configuration held in memory.
#[derive(Clone, Debug, Default)]
pub struct StaticSource(pub PlatformConfig);

impl ConfigSource for StaticSource {
    fn load(&self) -> Result<PlatformConfig, ConfigError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// A source that never has configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unavailable;

impl ConfigSource for Unavailable {
    fn load(&self) -> Result<PlatformConfig, ConfigError> {
        Err(ConfigError::Unavailable("no configuration source".to_string()))
    }

    fn describe(&self) -> String {
        "unavailable".to_string()
    }
}

/// Load configuration from a file.
///
/// Files ending in `.json` are parsed as JSON, everything else as TOML.
pub fn load_config(path: &Path) -> Result<PlatformConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;

    let config = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?
    };

    tracing::trace!(path = %path.display(), "Loaded modem configuration");

    Ok(config)
}
