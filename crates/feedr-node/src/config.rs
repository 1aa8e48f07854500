//! Configuration file management.

use std::path::PathBuf;

use feedr_types::{Params, ValidatorPower};
use serde::{Deserialize, Serialize};

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Storage and input settings.
    #[serde(default)]
    pub node: NodeSection,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// State written into a fresh database.
    #[serde(default)]
    pub genesis: GenesisConfig,
}

/// Storage and input configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSection {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// JSON-lines block file. Empty = stdin.
    #[serde(default)]
    pub blocks_file: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Genesis state. Ignored once the database holds parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisConfig {
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub validators: Vec<ValidatorPower>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from `path`, or from the default location.
    ///
    /// Falls back to defaults if the default file does not exist.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let config_path = path.unwrap_or_else(Self::config_path);
        if explicit || config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a TOML document.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = toml::from_str(content)?;
        config.genesis.params.validate()?;
        Ok(config)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("FEEDR_DATA_DIR") {
            return PathBuf::from(dir);
        }
        if self.node.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.node.data_dir)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("FEEDR_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".feedr"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/feedr"))
    }
}
