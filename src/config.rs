use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const CONFIG_DIR_PREFIX: &str = "finance-sync";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub google: GoogleConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Loopback port receiving the OAuth redirect
    pub callback_port: u16,
    /// How long to wait for the user to finish the consent screen
    pub login_timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            callback_port: 8085,
            login_timeout_secs: 300,
        }
    }
}

impl GoogleConfig {
    /// Cloud sync is only available when app credentials are present
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty()
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.callback_port)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }
}

/// What a local write does when the durable write fails.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Keep the new value in memory and notify once; it is lost on restart.
    Optimistic,
    /// Persist first and leave the in-memory value untouched on failure.
    #[default]
    Transactional,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub debounce_ms: u64,
    pub init_timeout_secs: u64,
    pub durability: Durability,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2500,
            init_timeout_secs: 5,
            durability: Durability::default(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load the config file, falling back to defaults (local-only) when absent
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file()?;

        if !config_path.exists() {
            debug!(path = ?config_path, "No config file, cloud sync disabled");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))
    }

    fn xdg_dirs() -> xdg::BaseDirectories {
        xdg::BaseDirectories::with_prefix(CONFIG_DIR_PREFIX)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        let xdg_dirs = Self::xdg_dirs();
        xdg_dirs
            .place_config_file("config.toml")
            .map_err(|e| AppError::Config(format!("Failed to create config directory: {}", e)))
    }

    /// Directory holding one file per collection
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        Self::xdg_dirs()
            .get_data_home()
            .ok_or_else(|| AppError::Config("Failed to determine data directory".to_string()))
    }

    /// Get the cache directory path
    pub fn cache_dir() -> Result<PathBuf> {
        let xdg = Self::xdg_dirs();
        xdg.get_cache_home()
            .ok_or_else(|| AppError::Config("Failed to determine cache directory".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = Config {
            google: GoogleConfig {
                client_id: "test_client_id".to_string(),
                client_secret: "test_client_secret".to_string(),
                ..Default::default()
            },
            sync: SyncConfig {
                durability: Durability::Optimistic,
                ..Default::default()
            },
            storage: StorageConfig {
                data_dir: Some(PathBuf::from("/tmp/finance")),
            },
        };

        let serialized = toml::to_string(&config).unwrap();
        let deserialized = Config::parse(&serialized).unwrap();

        assert_eq!(config.google.client_id, deserialized.google.client_id);
        assert_eq!(deserialized.sync.durability, Durability::Optimistic);
        assert_eq!(deserialized.data_dir().unwrap(), PathBuf::from("/tmp/finance"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config =
            Config::parse("[google]\nclient_id = \"abc.apps.googleusercontent.com\"\n").unwrap();

        assert!(config.google.is_configured());
        assert_eq!(config.google.redirect_uri(), "http://127.0.0.1:8085/callback");
        assert_eq!(config.sync.debounce(), Duration::from_millis(2500));
        assert_eq!(config.sync.init_timeout(), Duration::from_secs(5));
        assert_eq!(config.sync.durability, Durability::Transactional);
    }

    #[test]
    fn test_empty_client_id_is_not_configured() {
        let config = Config::parse("").unwrap();
        assert!(!config.google.is_configured());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let err = Config::parse("[sync]\ndebounce_ms = \"soon\"\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
