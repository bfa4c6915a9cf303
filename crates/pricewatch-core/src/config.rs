//! Session configuration management.
//!
//! This module handles loading the session configuration: API location,
//! token lifetime, timer intervals and the credential storage backend.
//!
//! Configuration is stored at `~/.config/pricewatch/config.json` and every
//! field falls back to its default when absent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "pricewatch";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Credential pairs are treated as expired 7 days after issuance,
/// regardless of what the server still accepts.
const DEFAULT_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Refresh every 15 minutes in production.
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15 * 60;

/// Development builds refresh more often so rotation problems show up early.
const DEFAULT_REFRESH_INTERVAL_DEV_SECS: u64 = 5 * 60;

/// Timer intervals and timeouts shorter than this are raised to it.
const MIN_INTERVAL_SECS: u64 = 1;

/// Upper bound on the credential lifetime (one year).
const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Expiry is checked every 30 minutes.
const DEFAULT_EXPIRY_CHECK_INTERVAL_SECS: u64 = 30 * 60;

/// Consecutive 401s handled before the loop guard goes quiet.
const DEFAULT_LOOP_GUARD_THRESHOLD: u32 = 3;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";

/// Where the credential pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

impl StorageKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Some(StorageKind::File),
            "keyring" => Some(StorageKind::Keyring),
            "memory" => Some(StorageKind::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub api_base_url: String,
    pub token_ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub refresh_interval_dev_secs: u64,
    pub expiry_check_interval_secs: u64,
    pub loop_guard_threshold: u32,
    pub request_timeout_secs: u64,
    pub development: bool,
    pub storage: StorageKind,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            refresh_interval_dev_secs: DEFAULT_REFRESH_INTERVAL_DEV_SECS,
            expiry_check_interval_secs: DEFAULT_EXPIRY_CHECK_INTERVAL_SECS,
            loop_guard_threshold: DEFAULT_LOOP_GUARD_THRESHOLD,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            development: false,
            storage: StorageKind::default(),
        }
    }
}

impl SessionConfig {
    /// Load the config file (defaults if missing) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.normalize();
        Ok(config)
    }

    /// Pull out-of-range durations back into bounds, warning for each one.
    pub fn normalize(&mut self) {
        for (field, value) in [
            ("refresh_interval_secs", &mut self.refresh_interval_secs),
            ("refresh_interval_dev_secs", &mut self.refresh_interval_dev_secs),
            ("expiry_check_interval_secs", &mut self.expiry_check_interval_secs),
            ("request_timeout_secs", &mut self.request_timeout_secs),
        ] {
            if *value < MIN_INTERVAL_SECS {
                warn!(field, value = *value, min = MIN_INTERVAL_SECS, "Interval too short, raising");
                *value = MIN_INTERVAL_SECS;
            }
        }
        let ttl = self.token_ttl_secs.clamp(MIN_INTERVAL_SECS, MAX_TOKEN_TTL_SECS);
        if ttl != self.token_ttl_secs {
            warn!(value = self.token_ttl_secs, clamped = ttl, "Token TTL out of range");
            self.token_ttl_secs = ttl;
        }
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

    /// Apply `PRICEWATCH_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PRICEWATCH_API_URL").filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(env) = lookup("PRICEWATCH_ENV") {
            self.development = env.trim().eq_ignore_ascii_case("development");
        }
        if let Some(kind) = lookup("PRICEWATCH_STORAGE").and_then(|v| StorageKind::parse(&v)) {
            self.storage = kind;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the session file and logs.
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        let secs = self.token_ttl_secs.clamp(MIN_INTERVAL_SECS, MAX_TOKEN_TTL_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    /// Refresh cadence for the current environment.
    pub fn refresh_interval(&self) -> Duration {
        if self.development {
            bounded_secs(self.refresh_interval_dev_secs)
        } else {
            bounded_secs(self.refresh_interval_secs)
        }
    }

    pub fn expiry_check_interval(&self) -> Duration {
        bounded_secs(self.expiry_check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        bounded_secs(self.request_timeout_secs)
    }

    /// Join a relative API path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

// Zero periods panic in tokio's interval
fn bounded_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_INTERVAL_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.token_ttl(), chrono::Duration::days(7));
        assert_eq!(config.refresh_interval(), Duration::from_secs(15 * 60));
        assert_eq!(config.expiry_check_interval(), Duration::from_secs(30 * 60));
        assert_eq!(config.loop_guard_threshold, 3);
        assert_eq!(config.storage, StorageKind::File);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"api_base_url": "https://prices.example.com/api/v1", "storage": "keyring"}"#)
                .expect("partial config should parse");
        assert_eq!(config.api_base_url, "https://prices.example.com/api/v1");
        assert_eq!(config.storage, StorageKind::Keyring);
        assert_eq!(config.token_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
    }

    #[test]
    fn test_development_interval_is_shorter() {
        let config = SessionConfig {
            development: true,
            ..Default::default()
        };
        assert!(config.refresh_interval() < Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PRICEWATCH_API_URL", "https://api.example.com/api/v1/"),
            ("PRICEWATCH_ENV", "Development"),
            ("PRICEWATCH_STORAGE", "memory"),
        ]
        .into_iter()
        .collect();

        let mut config = SessionConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert!(config.development);
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(
            config.endpoint("auth/login/"),
            "https://api.example.com/api/v1/auth/login/"
        );
    }

    #[test]
    fn test_unknown_storage_override_is_ignored() {
        let mut config = SessionConfig::default();
        config.apply_overrides(|key| (key == "PRICEWATCH_STORAGE").then(|| "floppy".to_string()));
        assert_eq!(config.storage, StorageKind::File);
    }

    #[test]
    fn test_zero_intervals_are_raised() {
        let config = SessionConfig {
            refresh_interval_secs: 0,
            refresh_interval_dev_secs: 0,
            expiry_check_interval_secs: 0,
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
        assert_eq!(config.expiry_check_interval(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), Duration::from_secs(1));

        let dev = SessionConfig {
            development: true,
            ..config
        };
        assert_eq!(dev.refresh_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_ttl_is_bounded() {
        let config = SessionConfig {
            token_ttl_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.token_ttl(), chrono::Duration::days(365));
    }

    #[test]
    fn test_normalize_rewrites_fields() {
        let mut config: SessionConfig =
            serde_json::from_str(r#"{"refresh_interval_secs": 0, "token_ttl_secs": 0}"#)
                .expect("config should parse");
        config.normalize();
        assert_eq!(config.refresh_interval_secs, 1);
        assert_eq!(config.token_ttl_secs, 1);
        assert_eq!(config.expiry_check_interval_secs, DEFAULT_EXPIRY_CHECK_INTERVAL_SECS);
    }
}
