//! Configuration validation rules.
//!
//! Runs after `CacheConfig` values have been loaded from environment, files,
//! or defaults. A missing `dir` is not a validation error: engines report it
//! as `NotConfigured` so the caller can run without a cache.

use crate::config::{CacheConfig, StorageKind};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `dir` is set to an empty path
    /// - `fingerprint_headers` contains an empty name
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = &self.dir
            && dir.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid { field: "dir".into(), reason: "must not be empty".into() });
        }

        if self.fingerprint_headers.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "fingerprint_headers".into(),
                reason: "header names must not be empty".into(),
            });
        }

        if self.storage == StorageKind::Memory && self.dir.is_some() {
            tracing::warn!(dir = ?self.dir, "memory storage ignores dir; records will not survive the process");
        }

        Ok(())
    }

    /// The root directory, or `ConfigError::Missing` when unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `dir` is not set.
    pub fn require_dir(&self) -> Result<&std::path::Path, ConfigError> {
        self.dir.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "dir".into(),
            hint: "Set HTTPCACHE_DIR environment variable".into(),
        })
    }
}
