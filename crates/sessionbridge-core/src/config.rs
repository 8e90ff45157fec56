//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the identity provider endpoint, bootstrap timeout and
//! the last signed-in user.
//!
//! Configuration is stored at `~/.config/sessionbridge/config.json`.
//! Environment variables override file values (see `Config::apply_env`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bootstrap::BootstrapConfig;

/// Application name used for config/cache directory paths and keychain entries
pub const APP_NAME: &str = "sessionbridge";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// How long startup may wait on the provider before the splash is dropped.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// How often the HTTP provider re-checks the userinfo endpoint.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

pub const ENV_USERINFO_URL: &str = "SESSIONBRIDGE_USERINFO_URL";
pub const ENV_TIMEOUT_MS: &str = "SESSIONBRIDGE_TIMEOUT_MS";
pub const ENV_ACCESS_TOKEN: &str = "SESSIONBRIDGE_ACCESS_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub userinfo_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub store_token_in_keyring: bool,
    pub last_user_id: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
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
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override file values with environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(ENV_USERINFO_URL).filter(|url| !url.is_empty()) {
            self.userinfo_url = Some(url);
        }
        if let Some(raw) = var(ENV_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.timeout_ms = Some(ms),
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {}", ENV_TIMEOUT_MS),
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig {
            timeout: self.timeout(),
            ..BootstrapConfig::default()
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
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.userinfo_url.is_none());
        assert!(!config.store_token_in_keyring);
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            userinfo_url: Some("https://id.example.com/userinfo".to_string()),
            timeout_ms: Some(750),
            store_token_in_keyring: true,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.userinfo_url, config.userinfo_url);
        assert_eq!(loaded.timeout(), Duration::from_millis(750));
        assert!(loaded.store_token_in_keyring);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_USERINFO_URL, "https://override/userinfo"),
            (ENV_TIMEOUT_MS, "250"),
        ]);
        let mut config = Config {
            userinfo_url: Some("https://file/userinfo".to_string()),
            ..Config::default()
        };
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.userinfo_url.as_deref(), Some("https://override/userinfo"));
        assert_eq!(config.bootstrap_config().timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_env_timeout_is_ignored() {
        let mut config = Config {
            timeout_ms: Some(900),
            ..Config::default()
        };
        config.apply_vars(|key| (key == ENV_TIMEOUT_MS).then(|| "soon".to_string()));
        assert_eq!(config.timeout_ms, Some(900));
    }

    #[test]
    fn test_poll_interval_floor() {
        let config = Config {
            poll_interval_secs: Some(0),
            ..Config::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
