//! Cache configuration with layered loading.
//!
//! Configuration is loaded with figment from multiple sources:
//!
//! 1. Environment variables (HTTPCACHE_*)
//! 2. TOML config file (if HTTPCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::record::Expiration;

mod validation;

pub use validation::ConfigError;

/// Which storage engine backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// One directory per record under `dir`.
    #[default]
    Filesystem,
    /// A single SQLite database file inside `dir`.
    Sqlite,
    /// Process-local map, lost on exit.
    Memory,
}

/// Cache configuration.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (HTTPCACHE_*)
/// 2. TOML file from `HTTPCACHE_CONFIG_FILE` (if set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch. A disabled cache behaves as if it were not configured.
    ///
    /// Set via HTTPCACHE_ENABLED environment variable.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Root directory of the cache.
    ///
    /// Set via HTTPCACHE_DIR environment variable. Required by the filesystem
    /// and SQLite engines.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Seconds a record stays valid after it was written. Negative means never expire.
    ///
    /// Set via HTTPCACHE_EXPIRATION_SECS environment variable.
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: i64,

    /// Strict mode: fail requests that are not already cached instead of fetching them.
    ///
    /// Set via HTTPCACHE_IGNORE_MISSING environment variable.
    #[serde(default)]
    pub ignore_missing: bool,

    /// Storage engine.
    ///
    /// Set via HTTPCACHE_STORAGE environment variable.
    #[serde(default)]
    pub storage: StorageKind,

    /// Request header names folded into the fingerprint.
    ///
    /// Set via HTTPCACHE_FINGERPRINT_HEADERS environment variable (comma-separated).
    #[serde(default, deserialize_with = "string_or_list")]
    pub fingerprint_headers: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_expiration_secs() -> i64 {
    -1
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
        OneOrMany::Many(v) => v,
    })
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            expiration_secs: default_expiration_secs(),
            ignore_missing: false,
            storage: StorageKind::default(),
            fingerprint_headers: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Configuration rooted at `dir` with every other field defaulted.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()), ..Default::default() }
    }

    /// Expiration window derived from `expiration_secs`.
    pub fn expiration(&self) -> Expiration {
        Expiration::from_secs(self.expiration_secs)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("HTTPCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("HTTPCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
