use crate::photos::hash::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_RENAME_PATTERN: &str = "%Y-%m-%d %H%M%S";
const CONFIG_DIR_NAME: &str = "snapkit";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Settings loaded from `config.toml`. Every field has a default, so an
/// empty file (or no file) is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub rename: RenameConfig,
    pub dedupe: DedupeConfig,
    pub plot: PlotConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenameConfig {
    /// chrono format string for the new file stem
    pub pattern: String,
    /// Interpret modification times in local time instead of UTC
    pub use_local_time: bool,
    /// Lowercase extensions to rename; `None` renames every file with an extension
    pub extensions: Option<Vec<String>>,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_RENAME_PATTERN.to_string(),
            use_local_time: false,
            extensions: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupeConfig {
    pub algorithm: DigestAlgorithm,
    /// Only delete duplicates whose path contains this substring
    pub delete_matching: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlotConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Config {
    /// Parse a config from TOML text. `origin` is only used in error messages.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    /// Load the explicit file if given, otherwise the per-user file if it
    /// exists, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            log::debug!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) if path.is_file() => {
                log::debug!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            _ => {
                log::debug!("No config file found; using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// `<config_dir>/snapkit/config.toml`, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
