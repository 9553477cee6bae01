//! Storage engines for cached responses.
//!
//! Every engine implements [`CacheStorage`]:
//!
//! - `FilesystemStorage`: one directory per record, sharded by key prefix
//! - `SqliteStorage`: one table in a WAL-mode SQLite database
//! - `MemoryStorage`: process-local map for tests and dry runs
//!
//! Engines share [`StorageOptions`] for fingerprinting, expiration and response
//! reconstruction, so a record is a hit or a miss under the same rules on every
//! backend. Corrupt or partially written records never leave an engine as
//! errors; they are logged and reported as misses.

pub mod filesystem;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::Error;
use crate::config::{CacheConfig, StorageKind};
use crate::fingerprint::{Fingerprinter, Sha256Fingerprinter};
use crate::key::{CacheKey, Namespace};
use crate::record::{CacheRecord, Expiration};
use crate::request::Request;
use crate::response::Response;
use crate::responsetypes::{ContentTypeResolver, ResponseTypeResolver};

pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Namespace-scoped, key-addressed response storage.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Called when a crawl session for `namespace` starts.
    async fn open_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        let _ = namespace;
        Ok(())
    }

    /// Called when a crawl session for `namespace` ends.
    async fn close_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        let _ = namespace;
        Ok(())
    }

    /// Return the cached response for `request`, or `None` when absent, expired or corrupt.
    async fn retrieve(&self, namespace: &Namespace, request: &Request) -> Result<Option<Response>, Error>;

    /// Persist `response` as the record for `request`, replacing any previous one.
    async fn store(&self, namespace: &Namespace, request: &Request, response: &Response) -> Result<(), Error>;

    /// Physically delete expired and unreadable records. Returns how many were removed.
    async fn purge_expired(&self, namespace: &Namespace) -> Result<u64, Error>;
}

/// Reasons a stored record cannot be served. Always downgraded to a miss.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CorruptRecord {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("unreadable {file}: {source}")]
    Unreadable { file: &'static str, source: std::io::Error },

    #[error("undecodable metadata: {0}")]
    Metadata(String),

    #[error("{file} is {actual} bytes, expected {expected}")]
    LengthMismatch { file: &'static str, expected: u64, actual: u64 },

    #[error("response body digest mismatch")]
    DigestMismatch,

    #[error("invalid stored url {0:?}")]
    InvalidUrl(String),
}

/// Behaviour shared by all engines.
#[derive(Clone)]
pub struct StorageOptions {
    pub expiration: Expiration,
    pub fingerprinter: Arc<dyn Fingerprinter>,
    pub resolver: Arc<dyn ResponseTypeResolver>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            expiration: Expiration::Never,
            fingerprinter: Arc::new(Sha256Fingerprinter::new()),
            resolver: Arc::new(ContentTypeResolver),
        }
    }
}

impl std::fmt::Debug for StorageOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageOptions").field("expiration", &self.expiration).finish_non_exhaustive()
    }
}

impl StorageOptions {
    /// Options derived from configuration: expiration window and fingerprint headers.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            expiration: config.expiration(),
            fingerprinter: Arc::new(Sha256Fingerprinter::with_headers(&config.fingerprint_headers)),
            ..Default::default()
        }
    }

    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ResponseTypeResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn key_for(&self, request: &Request) -> CacheKey {
        self.fingerprinter.fingerprint(request)
    }

    /// Rebuild a response from a stored record, inferring its kind.
    pub(crate) fn build_response(&self, record: CacheRecord) -> Result<Response, CorruptRecord> {
        let url = Url::parse(&record.url).map_err(|_| CorruptRecord::InvalidUrl(record.url.clone()))?;
        let kind = self.resolver.resolve(&record.response_headers, &record.url);
        Ok(Response::new(url, record.status, record.response_headers, record.response_body).with_kind(kind))
    }
}

/// Open the engine selected by `config`.
///
/// # Errors
///
/// Returns `Error::NotConfigured` when the cache is disabled, or when a
/// disk-backed engine has no `dir`.
pub async fn open(config: &CacheConfig) -> Result<Arc<dyn CacheStorage>, Error> {
    if !config.enabled {
        return Err(Error::NotConfigured("cache disabled".into()));
    }
    let storage: Arc<dyn CacheStorage> = match config.storage {
        StorageKind::Filesystem => Arc::new(FilesystemStorage::from_config(config)?),
        StorageKind::Sqlite => Arc::new(SqliteStorage::from_config(config).await?),
        StorageKind::Memory => Arc::new(MemoryStorage::new(StorageOptions::from_config(config))),
    };
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::responsetypes::ResponseKind;
    use chrono::Utc;

    #[tokio::test]
    async fn test_open_not_configured() {
        let result = open(&CacheConfig::default()).await;
        assert!(matches!(result, Err(Error::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_open_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CacheConfig { enabled: false, ..CacheConfig::with_dir(tmp.path()) };
        assert!(matches!(open(&config).await, Err(Error::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_open_memory_without_dir() {
        let config = CacheConfig { storage: StorageKind::Memory, ..Default::default() };
        assert!(open(&config).await.is_ok());
    }

    #[test]
    fn test_build_response_uses_resolver() {
        let stub = |_: &Headers, _: &str| ResponseKind::Json;
        let options = StorageOptions::default().with_resolver(Arc::new(stub));
        let request = Request::get("http://example.test/a").unwrap();
        let response = Response::new(request.url.clone(), 200, Headers::new(), "{}");
        let record = CacheRecord::capture(&request, &response, Utc::now());

        let rebuilt = options.build_response(record).unwrap();
        assert_eq!(rebuilt.kind, ResponseKind::Json);
        assert_eq!(rebuilt.status, 200);
        assert!(rebuilt.flags.is_empty());
    }

    #[test]
    fn test_build_response_bad_url() {
        let request = Request::get("http://example.test/a").unwrap();
        let response = Response::new(request.url.clone(), 200, Headers::new(), "");
        let mut record = CacheRecord::capture(&request, &response, Utc::now());
        record.url = "::not a url::".into();
        assert!(matches!(StorageOptions::default().build_response(record), Err(CorruptRecord::InvalidUrl(_))));
    }
}
