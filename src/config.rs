//! Configuration management for the record engine
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (tool-engine.toml)
//! - Environment variables (TOOL_ENGINE__SECTION__KEY)
//!
//! ## Example config file (tool-engine.toml):
//! ```toml
//! [engine]
//! default_page_size = 20
//! max_page_size = 100
//! internal_key_prefix = "_"
//!
//! [store]
//! schema_dir = "./schemas"
//!
//! [notifier]
//! channel_capacity = 256
//!
//! [logging]
//! filter = "info,tool_engine=debug"
//! ```

use std::path::{Path, PathBuf};

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::query::PageLimits;

/// Main configuration for the record engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query and diff behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Page size when neither the query nor the schema sets one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Keys with this prefix never appear in audit diffs
    #[serde(default = "default_internal_prefix")]
    pub internal_key_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for the JSON schema store; in-memory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

fn default_internal_prefix() -> String {
    "_".to_string()
}

fn default_channel_capacity() -> usize {
    crate::notifier::DEFAULT_CHANNEL_CAPACITY
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            internal_key_prefix: default_internal_prefix(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl EngineSettings {
    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }
}

impl EngineConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the default locations
    pub fn load_from(config_path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["tool-engine.toml", ".tool-engine.toml", "config/tool-engine.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(dirs) = directories::ProjectDirs::from("dev", "toolforge", "tool-engine") {
            let xdg_config = dirs.config_dir().join("tool-engine.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("TOOL_ENGINE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.max_page_size == 0 || engine.default_page_size == 0 {
            return Err(EngineError::Configuration(
                "page sizes must be at least 1".to_string(),
            ));
        }
        if engine.default_page_size > engine.max_page_size {
            return Err(EngineError::Configuration(format!(
                "default_page_size {} exceeds max_page_size {}",
                engine.default_page_size, engine.max_page_size
            )));
        }
        if self.notifier.channel_capacity == 0 {
            return Err(EngineError::Configuration(
                "notifier channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = self
            .to_toml()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Schema directory resolved against the working directory
    pub fn schema_dir(&self) -> Option<PathBuf> {
        self.store.schema_dir.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                std::env::current_dir().unwrap_or_default().join(p)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.default_page_size, 20);
        assert_eq!(config.engine.max_page_size, 100);
        assert_eq!(config.notifier.channel_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_config() {
        let toml_str = EngineConfig::default().to_toml().unwrap();
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[notifier]"));
        assert!(!toml_str.contains("schema_dir"));
    }

    #[test]
    fn test_save_and_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.engine.default_page_size = 50;
        config.store.schema_dir = Some(PathBuf::from("/var/lib/tools"));
        config.save(&path).unwrap();

        let loaded = EngineConfig::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.engine.default_page_size, 50);
        assert_eq!(loaded.store.schema_dir, Some(PathBuf::from("/var/lib/tools")));
    }

    #[test]
    fn test_validate_rejects_inverted_page_sizes() {
        let mut config = EngineConfig::default();
        config.engine.default_page_size = 200;
        assert!(matches!(config.validate(), Err(EngineError::Configuration(_))));
    }
}
