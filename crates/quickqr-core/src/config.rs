//! Application configuration management.
//!
//! Configuration is stored at `~/.config/quickqr/config.json`. The API base
//! URL and identity client id can be overridden through `QUICKQR_API_URL` and
//! `QUICKQR_GOOGLE_CLIENT_ID`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::client::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::storage::{FileStorage, KeyValueStorage, KeyringStorage, MemoryStorage};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "quickqr";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// API debug log file in the cache directory
const API_LOG_FILE: &str = "api_log.json";

pub const API_URL_ENV: &str = "QUICKQR_API_URL";
pub const GOOGLE_CLIENT_ID_ENV: &str = "QUICKQR_GOOGLE_CLIENT_ID";

/// Where the session token is kept between runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub google_client_id: Option<String>,
    pub storage: StorageBackend,
    pub last_username: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            google_client_id: None,
            storage: StorageBackend::default(),
            last_username: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(client_id) = lookup(GOOGLE_CLIENT_ID_ENV).filter(|v| !v.trim().is_empty()) {
            self.google_client_id = Some(client_id.trim().to_string());
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Storage for the session token and pending redirect
    pub fn open_storage(&self) -> Result<Arc<dyn KeyValueStorage>> {
        Ok(match self.storage {
            StorageBackend::File => self.open_storage_in(&self.cache_dir()?),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        })
    }

    /// Storage for the API debug log. The keychain is no place for it, so the
    /// keyring backend logs to the cache directory instead.
    pub fn open_log_storage(&self) -> Arc<dyn KeyValueStorage> {
        if self.storage == StorageBackend::Memory {
            return Arc::new(MemoryStorage::new());
        }
        match self.cache_dir() {
            Ok(dir) => self.open_log_storage_in(&dir),
            Err(e) => {
                warn!(error = %e, "No cache directory, API log kept in memory");
                Arc::new(MemoryStorage::new())
            }
        }
    }

    /// Session storage rooted at `dir` (only the file backend uses it)
    pub fn open_storage_in(&self, dir: &Path) -> Arc<dyn KeyValueStorage> {
        match self.storage {
            StorageBackend::File => Arc::new(FileStorage::new(dir)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        }
    }

    /// API log storage rooted at `dir`.
    ///
    /// The log gets its own file: it is rewritten on every call and must never
    /// read-modify-write the file that holds the session token.
    pub fn open_log_storage_in(&self, dir: &Path) -> Arc<dyn KeyValueStorage> {
        match self.storage {
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            _ => Arc::new(FileStorage::at_path(dir.join(API_LOG_FILE))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    use crate::api_log::{ApiLog, CallContext};
    use crate::auth::{SessionStore, Token};
    use crate::storage::TOKEN_KEY;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.storage, StorageBackend::File);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            storage: StorageBackend::Keyring,
            last_username: Some("alice@example.com".to_string()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.storage, StorageBackend::Keyring);
        assert_eq!(loaded.last_username.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"storage": "memory"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (API_URL_ENV, "http://localhost:8000/api/v1/"),
            (GOOGLE_CLIENT_ID_ENV, " client-123 "),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "http://localhost:8000/api/v1");
        assert_eq!(config.google_client_id.as_deref(), Some("client-123"));
    }

    #[test]
    fn test_blank_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|_| Some("  ".to_string()));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.google_client_id, None);
    }

    #[test]
    fn test_api_log_file_is_separate_from_session_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let session = Arc::new(SessionStore::new(config.open_storage_in(dir.path())));
        let api_log = Arc::new(ApiLog::new(config.open_log_storage_in(dir.path()), "API"));

        let logger = {
            let api_log = api_log.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    api_log.log_api_call(&format!("/health/{i}"), "GET", None, None, None, CallContext::default());
                }
            })
        };
        for i in 0..50 {
            session.login(Token::new(format!("token-{i}")));
            let on_disk = FileStorage::new(dir.path()).get(TOKEN_KEY).unwrap();
            assert_eq!(on_disk, session.get_token().map(|t| t.as_str().to_string()));
        }
        logger.join().unwrap();

        let on_disk = FileStorage::new(dir.path()).get(TOKEN_KEY).unwrap();
        assert_eq!(on_disk.as_deref(), Some("token-49"));
        assert_eq!(api_log.entries().len(), 50);

        session.logout();
        api_log.log_api_call("/health", "GET", None, None, None, CallContext::default());
        assert_eq!(FileStorage::new(dir.path()).get(TOKEN_KEY).unwrap(), None);
        assert!(dir.path().join(API_LOG_FILE).exists());
    }

    #[test]
    fn test_memory_backend_never_touches_disk() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            storage: StorageBackend::Memory,
            ..Config::default()
        };
        config.open_storage_in(dir.path()).set(TOKEN_KEY, "abc").unwrap();
        config.open_log_storage_in(dir.path()).set("k", "v").unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
