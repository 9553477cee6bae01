//! Unified error types for httpcache.
//!
//! Every variant carries a stable upper-case code prefix so log lines and CLI
//! output can be matched without parsing the free-form message.

use tokio_rusqlite::rusqlite;

/// Unified error type for the cache, its storage engines and the fetch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cache has no usable configuration (no root directory, or disabled).
    ///
    /// Callers treat this as "caching disabled", never as a fatal start-up error.
    #[error("NOT_CONFIGURED: {0}")]
    NotConfigured(String),

    /// Strict mode: the request had to be served from the cache but no record exists.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Namespace name is empty or not safe to use as a path component.
    #[error("INVALID_NAMESPACE: {0}")]
    InvalidNamespace(String),

    /// Fingerprint is too short or not safe to use as a path component.
    #[error("INVALID_KEY: {0}")]
    InvalidKey(String),

    /// Filesystem operation failed.
    #[error("CACHE_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be encoded.
    #[error("CACHE_ERROR: serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Transport failure or unusable HTTP response.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),
}

impl Error {
    /// Whether this error means the cache is simply not in use.
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Error::NotConfigured(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
