//! Configuration file parser for the importer's `config.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged as warnings, since they are usually
//! typos.
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{Credentials, PageFailurePolicy, TransportConfig};
use crate::ingest::OwnerPolicy;

/// Env var that overrides `password` from the config file.
pub const PASSWORD_ENV: &str = "ATOMIMPORT_PASSWORD";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Importer configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `password` is masked in `Debug` output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding users, experiments and datasets.
    pub database_path: PathBuf,

    /// Root directory of the content-addressed file store.
    pub file_store_dir: PathBuf,

    /// Connect and per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retries for 429, 5xx and truncated responses.
    pub max_retries: u32,

    /// Upper bound on feed pages followed in one run.
    pub max_pages: usize,

    /// Reaction to an unreachable previous page: "abort" or "truncate".
    pub page_failure: PageFailurePolicy,

    /// Username that receives entries whose author matches nobody.
    /// Unset means such entries fail.
    pub owner_fallback: Option<String>,

    /// HTTP Basic username for protected feeds.
    pub username: Option<String>,

    /// HTTP Basic password. `ATOMIMPORT_PASSWORD` takes precedence.
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("atomimport.db"),
            file_store_dir: PathBuf::from("store"),
            request_timeout_secs: 30,
            max_retries: 3,
            max_pages: 1000,
            page_failure: PageFailurePolicy::Abort,
            owner_fallback: None,
            username: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("file_store_dir", &self.file_store_dir)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("max_pages", &self.max_pages)
            .field("page_failure", &self.page_failure)
            .field("owner_fallback", &self.owner_fallback)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "database_path",
        "file_store_dir",
        "request_timeout_secs",
        "max_retries",
        "max_pages",
        "page_failure",
        "owner_fallback",
        "username",
        "password",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file cannot exhaust memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Basic credentials, if a username is configured.
    ///
    /// The password comes from `ATOMIMPORT_PASSWORD` when set, else from the
    /// file; a username without any password sends an empty one.
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials_with(std::env::var(PASSWORD_ENV).ok())
    }

    fn credentials_with(&self, env_password: Option<String>) -> Option<Credentials> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        let password = env_password
            .map(SecretString::from)
            .or_else(|| self.password.clone())
            .unwrap_or_else(|| SecretString::from(String::new()));
        Some(Credentials {
            username: username.to_string(),
            password,
        })
    }

    /// Transport settings for feed and enclosure requests.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            credentials: self.credentials(),
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_retries: self.max_retries,
            ..TransportConfig::default()
        }
    }

    pub fn owner_policy(&self) -> OwnerPolicy {
        match self.owner_fallback.as_deref() {
            Some(username) if !username.is_empty() => OwnerPolicy::Fallback(username.to_string()),
            _ => OwnerPolicy::Strict,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
