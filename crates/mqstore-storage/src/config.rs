//! Persistent store configuration

use crate::engine::EngineOptions;
use mqstore_core::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Property name of the store file path in broker property maps
pub const PERSISTENT_STORE_PROPERTY_NAME: &str = "persistent_store";

/// Property name of the autosave interval (seconds) in broker property maps
pub const AUTOSAVE_INTERVAL_PROPERTY_NAME: &str = "autosave_interval";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store file path. Empty selects the in-memory engine.
    #[serde(default, alias = "persistent_store")]
    pub store_path: String,

    /// Delay between autosave commits, in seconds
    #[serde(
        default = "default_autosave_interval_seconds",
        alias = "autosave_interval"
    )]
    pub autosave_interval_seconds: u64,

    /// fsync on every commit
    #[serde(default = "default_true")]
    pub sync_on_commit: bool,
}

fn default_autosave_interval_seconds() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_path: String::new(),
            autosave_interval_seconds: default_autosave_interval_seconds(),
            sync_on_commit: true,
        }
    }
}

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Detect format from file extension, JSON when unknown
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

impl StoreConfig {
    /// File-backed store at `path`
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            store_path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_autosave_interval_seconds(mut self, seconds: u64) -> Self {
        self.autosave_interval_seconds = seconds;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.store_path.is_empty()
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_seconds)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            sync_on_commit: self.sync_on_commit,
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.autosave_interval_seconds == 0 {
            return Err(StorageError::Config(
                "autosave_interval_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build from a broker property map, using defaults for absent keys
    pub fn from_properties(props: &HashMap<String, String>) -> StorageResult<Self> {
        let mut config = Self::default();

        if let Some(path) = props.get(PERSISTENT_STORE_PROPERTY_NAME) {
            config.store_path = path.trim().to_string();
        }

        if let Some(interval) = props.get(AUTOSAVE_INTERVAL_PROPERTY_NAME) {
            config.autosave_interval_seconds = interval.trim().parse().map_err(|e| {
                StorageError::Config(format!(
                    "Invalid {} '{}': {}",
                    AUTOSAVE_INTERVAL_PROPERTY_NAME, interval, e
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load and validate from a JSON, YAML or TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content, ConfigFormat::detect(path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str, format: ConfigFormat) -> StorageResult<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| StorageError::Config(format!("JSON parse error: {}", e))),
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| StorageError::Config(format!("YAML parse error: {}", e))),
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| StorageError::Config(format!("TOML parse error: {}", e))),
        }
    }
}
