//! Application configuration management.
//!
//! This module handles loading and saving the client configuration:
//! API base URL, timer settings, the storage backend used for the session,
//! and the last email used to log in.
//!
//! Configuration is stored at `~/.config/projectdeck/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::storage::{FileStorage, KeyringStorage, Storage};

/// Application name used for config/data directory paths
const APP_NAME: &str = "projectdeck";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const ENV_API_URL: &str = "PROJECTDECK_API_URL";

/// Environment variable overriding `storage`
pub const ENV_STORAGE: &str = "PROJECTDECK_STORAGE";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How often the token monitor re-checks the expiry claim.
const DEFAULT_EXPIRY_CHECK_INTERVAL_SECS: u64 = 5 * 60;

/// Upper bound on how long startup waits for the stored session.
const DEFAULT_HYDRATION_TIMEOUT_MS: u64 = 100;

/// Delay between the session-expired notice and the redirect.
const DEFAULT_REDIRECT_DELAY_MS: u64 = 2000;

/// Floor for the expiry check period; a zero period would stop the monitor.
const MIN_EXPIRY_CHECK_INTERVAL_SECS: u64 = 1;

/// Floor for the hydration wait.
const MIN_HYDRATION_TIMEOUT_MS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub expiry_check_interval_secs: u64,
    pub hydration_timeout_ms: u64,
    pub redirect_delay_ms: u64,
    pub storage: StorageBackend,
    /// Try `/auth/refresh` when the token is about to expire instead of
    /// waiting for it to lapse.
    pub auto_refresh: bool,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            expiry_check_interval_secs: DEFAULT_EXPIRY_CHECK_INTERVAL_SECS,
            hydration_timeout_ms: DEFAULT_HYDRATION_TIMEOUT_MS,
            redirect_delay_ms: DEFAULT_REDIRECT_DELAY_MS,
            storage: StorageBackend::File,
            auto_refresh: false,
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `PROJECTDECK_*` environment overrides on top of the file values
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var(ENV_STORAGE) {
            self.storage = backend.parse()?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Open the durable storage backend selected by this config
    pub fn open_storage(&self) -> Result<Arc<dyn Storage>> {
        match self.storage {
            StorageBackend::File => Ok(Arc::new(FileStorage::new(self.data_dir()?)?)),
            StorageBackend::Keyring => Ok(Arc::new(KeyringStorage::default())),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_secs(
            self.expiry_check_interval_secs
                .max(MIN_EXPIRY_CHECK_INTERVAL_SECS),
        )
    }

    pub fn hydration_timeout(&self) -> Duration {
        Duration::from_millis(self.hydration_timeout_ms.max(MIN_HYDRATION_TIMEOUT_MS))
    }

    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }
}
