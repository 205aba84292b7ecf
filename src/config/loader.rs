//! Configuration file loader.

use std::path::{Path, PathBuf};

use super::AppConfig;

/// Environment variables applied on top of the loaded file.
const ENV_API_HOST: &str = "PRESSY_API_HOST";
const ENV_API_PORT: &str = "PRESSY_API_PORT";
const ENV_API_PREFIX: &str = "PRESSY_API_PREFIX";
const ENV_API_KEY: &str = "PRESSY_API_KEY";
const ENV_EXECUTABLE: &str = "PRESSY_EXECUTABLE";

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
    /// The single search path was given explicitly and must exist.
    required: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .pressy.toml
        search_paths.push(PathBuf::from(".pressy.toml"));

        // 2. User config directory: ~/.config/pressy/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("pressy").join("config.toml"));
        }

        Self {
            search_paths,
            required: false,
        }
    }

    /// Create a config loader for an explicitly given file.
    ///
    /// Unlike the default search, a missing file is an error.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
            required: true,
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// Environment overrides are applied afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an explicitly given file cannot be read.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let found = if self.required {
            self.search_paths.first().cloned()
        } else {
            self.find_config_file()
        };
        let mut config = match found {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config file");
                Self::load_from_path(&path)?
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                AppConfig::default()
            }
        };
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `PRESSY_*` overrides using `lookup` to read variables.
fn apply_env_overrides(
    config: &mut AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(host) = lookup(ENV_API_HOST) {
        config.api.host = host;
    }
    if let Some(port) = lookup(ENV_API_PORT) {
        config.api.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
            key: ENV_API_PORT,
            value: port,
        })?;
    }
    if let Some(prefix) = lookup(ENV_API_PREFIX) {
        config.api.prefix = prefix;
    }
    if let Some(key) = lookup(ENV_API_KEY) {
        config.api.api_key = key;
    }
    if let Some(path) = lookup(ENV_EXECUTABLE) {
        config.supervisor.executable_path = PathBuf::from(path);
    }
    Ok(())
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid API URL {url}: {source}")]
    InvalidApiUrl {
        url: String,
        source: url::ParseError,
    },
}
