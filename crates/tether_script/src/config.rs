//! Runtime settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gc: GcSettings,
    pub containers: ContainerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcSettings {
    /// Run a collection at call entry once `allocation_step` objects were
    /// allocated since the last pass.
    pub auto_collect: bool,
    pub allocation_step: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Reject container writes whose key does not convert; when off such
    /// writes are ignored.
    pub strict_keys: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gc: GcSettings::default(),
            containers: ContainerSettings::default(),
        }
    }
}

impl Default for GcSettings {
    fn default() -> Self {
        Self {
            auto_collect: false,
            allocation_step: 256,
        }
    }
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self { strict_keys: true }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
