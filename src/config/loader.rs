use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::RuntimeConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl RuntimeConfig {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/flowstate/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("flowstate").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// If the file doesn't exist, returns `RuntimeConfig::default()`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(RuntimeConfig::default());
        }
        Self::load_from(&path)
    }

    /// Loads and validates configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: RuntimeConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - At least one navigation stack, with unique non-empty ids
    /// - The initial stack exists
    /// - Timeouts and buffers are non-zero
    /// - Cache and navigation use distinct storage namespaces
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nav = &self.navigation;
        if nav.stacks.is_empty() {
            return Err(invalid("At least one navigation stack must be configured"));
        }

        let mut seen = HashSet::new();
        for id in &nav.stacks {
            if id.trim().is_empty() {
                return Err(invalid("Navigation stack ids must not be empty"));
            }
            if !seen.insert(id.as_str()) {
                return Err(invalid(format!("Duplicate navigation stack '{}'", id)));
            }
        }

        if let Some(initial) = &nav.initial {
            if !seen.contains(initial.as_str()) {
                return Err(invalid(format!(
                    "Initial stack '{}' not found in configured stacks",
                    initial
                )));
            }
        }

        if nav.transition_timeout_ms == 0 {
            return Err(invalid("navigation.transition_timeout_ms must be positive"));
        }
        if self.cache.change_buffer == 0 || self.realtime.channel_buffer == 0 {
            return Err(invalid("Channel buffers must be positive"));
        }
        if self.cache.namespace.is_empty() || self.cache.namespace == nav.namespace {
            return Err(invalid(
                "cache.namespace must be non-empty and differ from navigation.namespace",
            ));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}
