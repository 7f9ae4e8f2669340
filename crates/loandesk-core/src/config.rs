//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: which
//! portal the client acts for, the backend base URL, token lifetimes,
//! endpoint paths and where tokens are persisted.
//!
//! Configuration is stored at `~/.config/loandesk/config.json` and can be
//! overridden with `LOANDESK_*` environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{TokenKeys, TokenTtls};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "loandesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Access tokens are short-lived on both portals.
const ACCESS_TTL_MINUTES: i64 = 15;

const BORROWER_REFRESH_TTL_DAYS: i64 = 90;

const ADMIN_REFRESH_TTL_DAYS: i64 = 30;

/// Upper bound for a configured refresh token lifetime (ten years).
const MAX_REFRESH_TTL_DAYS: i64 = 3650;

/// HTTP request timeout in seconds, applied to every backend call.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_API_URL: &str = "LOANDESK_API_URL";
const ENV_PORTAL: &str = "LOANDESK_PORTAL";
const ENV_STORAGE: &str = "LOANDESK_STORAGE";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No API URL configured (set LOANDESK_API_URL or api_url in config.json)")]
    MissingApiUrl,

    #[error("Invalid API URL: {0}")]
    InvalidApiUrl(String),

    #[error("Unknown portal: {0} (expected 'borrower' or 'admin')")]
    UnknownPortal(String),

    #[error("Unknown storage backend: {0} (expected 'file', 'keyring' or 'memory')")]
    UnknownStorage(String),

    #[error("Access token lifetime ({access_minutes}m) must be shorter than refresh token lifetime ({refresh_days}d)")]
    InvalidTtl { access_minutes: i64, refresh_days: i64 },

    #[error("Request timeout must be greater than zero")]
    InvalidTimeout,
}

/// Which front end the client acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Portal {
    #[default]
    Borrower,
    Admin,
}

impl Portal {
    pub fn as_str(self) -> &'static str {
        match self {
            Portal::Borrower => "borrower",
            Portal::Admin => "admin",
        }
    }

    /// Storage keys the web front ends use for this portal's tokens.
    pub fn token_keys(self) -> TokenKeys {
        match self {
            Portal::Borrower => TokenKeys::new("token", "refreshToken"),
            Portal::Admin => TokenKeys::new("adminToken", "adminRefreshToken"),
        }
    }

    pub fn default_refresh_ttl_days(self) -> i64 {
        match self {
            Portal::Borrower => BORROWER_REFRESH_TTL_DAYS,
            Portal::Admin => ADMIN_REFRESH_TTL_DAYS,
        }
    }

    pub fn default_endpoints(self) -> Endpoints {
        let prefix = match self {
            Portal::Borrower => "",
            Portal::Admin => "/admin",
        };
        Endpoints {
            login: format!("{}/auth/login", prefix),
            refresh: format!("{}/auth/refresh", prefix),
            me: format!("{}/auth/me", prefix),
            logout: format!("{}/auth/logout", prefix),
        }
    }
}

impl FromStr for Portal {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "borrower" | "frontend" => Ok(Portal::Borrower),
            "admin" => Ok(Portal::Admin),
            other => Err(ConfigError::UnknownPortal(other.to_string())),
        }
    }
}

impl std::fmt::Display for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend paths used by the gateway itself. All other paths are opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub me: String,
    pub logout: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Portal::Borrower.default_endpoints()
    }
}

/// Where tokens are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// JSON file in the cache directory, with the OS keychain as fallback
    #[default]
    File,
    /// OS keychain only
    Keyring,
    /// In-process only; nothing survives the process
    Memory,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "keyring" => Ok(StorageKind::Keyring),
            "memory" => Ok(StorageKind::Memory),
            other => Err(ConfigError::UnknownStorage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_url: Option<String>,
    #[serde(default)]
    pub portal: Portal,
    pub access_ttl_minutes: Option<i64>,
    pub refresh_ttl_days: Option<i64>,
    pub request_timeout_secs: Option<u64>,
    pub endpoints: Option<Endpoints>,
    #[serde(default)]
    pub storage: StorageKind,
}

impl Config {
    /// Load config from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
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

    /// Apply `LOANDESK_*` environment variables on top of file values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_url = Some(url.trim().to_string());
        }
        if let Some(portal) = lookup(ENV_PORTAL) {
            self.portal = portal.parse()?;
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage.parse()?;
        }
        Ok(())
    }

    /// Base URL of the backend, without a trailing slash.
    pub fn api_url(&self) -> Result<String, ConfigError> {
        let url = self.api_url.as_deref().ok_or(ConfigError::MissingApiUrl)?;
        let url = url.trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidApiUrl(url.to_string()));
        }
        Ok(url.to_string())
    }

    /// Token lifetimes, defaulting per portal.
    ///
    /// Both must be positive, the refresh lifetime at most ten years, and the
    /// access lifetime strictly shorter than the refresh lifetime.
    pub fn token_ttls(&self) -> Result<TokenTtls, ConfigError> {
        let access_minutes = self.access_ttl_minutes.unwrap_or(ACCESS_TTL_MINUTES);
        let refresh_days = self
            .refresh_ttl_days
            .unwrap_or_else(|| self.portal.default_refresh_ttl_days());
        let invalid = ConfigError::InvalidTtl {
            access_minutes,
            refresh_days,
        };

        if access_minutes <= 0 || refresh_days <= 0 || refresh_days > MAX_REFRESH_TTL_DAYS {
            return Err(invalid);
        }
        let (Some(access), Some(refresh)) = (
            Duration::try_minutes(access_minutes),
            Duration::try_days(refresh_days),
        ) else {
            return Err(invalid);
        };
        if access >= refresh {
            return Err(invalid);
        }
        Ok(TokenTtls { access, refresh })
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
            .clone()
            .unwrap_or_else(|| self.portal.default_endpoints())
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS))
    }

    /// Check everything needed before talking to the backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_url()?;

        self.token_ttls()?;

        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Per-portal cache directory; token files live here.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(self.portal.as_str()))
    }

    /// Keychain service name, kept separate per portal.
    pub fn keyring_service(&self) -> String {
        format!("{}-{}", APP_NAME, self.portal.as_str())
    }
}
