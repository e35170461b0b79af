use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{DEFAULT_IDEA_COLOR, DEFAULT_TASK_COLOR};
use crate::store::DEFAULT_QUOTA_BYTES;
use crate::utils;

/// Current configuration version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Upper bound on stored bytes; 0 disables the limit
    #[serde(default = "default_storage_quota")]
    pub storage_quota_bytes: u64,
    #[serde(default = "default_task_color")]
    pub default_task_color: String,
    #[serde(default = "default_idea_color")]
    pub default_idea_color: String,
    #[serde(default = "default_config_version")]
    pub config_version: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            storage_quota_bytes: default_storage_quota(),
            default_task_color: default_task_color(),
            default_idea_color: default_idea_color(),
            config_version: Some(CURRENT_CONFIG_VERSION),
        }
    }
}

// Default value functions
fn default_database_path() -> String {
    Config::default_database_path_for_profile(utils::Profile::Prod)
}

fn default_storage_quota() -> u64 {
    DEFAULT_QUOTA_BYTES
}

fn default_task_color() -> String {
    DEFAULT_TASK_COLOR.to_string()
}

fn default_idea_color() -> String {
    DEFAULT_IDEA_COLOR.to_string()
}

fn default_config_version() -> Option<u32> {
    Some(CURRENT_CONFIG_VERSION)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config directory: {0}")]
    ConfigDirError(String),
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
}

impl Config {
    /// Load configuration from the profile's config file, or create it with defaults if missing
    pub fn load_with_profile(profile: utils::Profile) -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path(profile)?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            // Create default config and save it
            let mut config = Config {
                database_path: Self::default_database_path_for_profile(profile),
                ..Config::default()
            };
            if let Err(e) = config.save_to_path(&config_path) {
                tracing::error!(path = %config_path.display(), error = %e, "failed to save config file");
                return Err(e);
            }
            tracing::info!(path = %config_path.display(), "created default config");
            Ok(config)
        }
    }

    /// Load configuration from an explicit file. Missing keys take their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to an explicit file
    pub fn save_to_path(&mut self, path: &Path) -> Result<(), ConfigError> {
        // Ensure config version is set before saving
        self.config_version = Some(CURRENT_CONFIG_VERSION);

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the config file
    pub fn get_config_path(profile: utils::Profile) -> Result<PathBuf, ConfigError> {
        let config_dir = utils::get_config_dir(profile)
            .ok_or_else(|| ConfigError::ConfigDirError("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get default database path for a specific profile
    fn default_database_path_for_profile(profile: utils::Profile) -> String {
        if let Some(data_dir) = utils::get_data_dir(profile) {
            data_dir.join("planner.db").to_string_lossy().to_string()
        } else {
            // Fallback paths - platform-specific
            #[cfg(target_os = "macos")]
            {
                match profile {
                    utils::Profile::Dev => "~/Library/Application Support/weekly-planner-dev/planner.db".to_string(),
                    utils::Profile::Prod => "~/Library/Application Support/weekly-planner/planner.db".to_string(),
                }
            }
            #[cfg(not(target_os = "macos"))]
            {
                match profile {
                    utils::Profile::Dev => "~/.local/share/weekly-planner-dev/planner.db".to_string(),
                    utils::Profile::Prod => "~/.local/share/weekly-planner/planner.db".to_string(),
                }
            }
        }
    }

    /// Get the expanded database path (with ~ expansion)
    pub fn get_database_path(&self) -> PathBuf {
        utils::expand_path(&self.database_path)
    }

    /// Quota to apply to the store, if any
    pub fn storage_quota(&self) -> Option<u64> {
        (self.storage_quota_bytes > 0).then_some(self.storage_quota_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_keys_take_defaults() {
        let config: Config = toml::from_str("database_path = \"/tmp/p.db\"\n").unwrap();
        assert_eq!(config.database_path, "/tmp/p.db");
        assert_eq!(config.storage_quota(), Some(DEFAULT_QUOTA_BYTES));
        assert_eq!(config.default_task_color, DEFAULT_TASK_COLOR);
        assert_eq!(config.config_version, Some(CURRENT_CONFIG_VERSION));
    }

    #[test]
    fn zero_quota_disables_limit() {
        let config: Config = toml::from_str("storage_quota_bytes = 0\n").unwrap();
        assert_eq!(config.storage_quota(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("config.toml");

        let mut config = Config {
            database_path: "~/planner.db".to_string(),
            default_idea_color: "#10B981".to_string(),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "storage_quota_bytes = \"lots\"").unwrap();
        assert!(matches!(
            Config::load_from_path(&path),
            Err(ConfigError::ParseError(_))
        ));
    }
}
