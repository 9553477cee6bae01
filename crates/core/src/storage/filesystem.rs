//! Filesystem storage engine.
//!
//! ### Layout
//! Each record is a directory at `root/namespace/key[0:2]/key/` holding:
//!
//! - `meta`: pretty JSON of url, method, status and timestamp, for humans
//! - `pickled_meta`: compact JSON of the same fields plus payload lengths and
//!   the response body SHA-256, the file actually used for retrieval
//! - `response_headers`, `request_headers`: raw wire-format header blocks
//! - `response_body`, `request_body`: raw payloads
//!
//! ### Writes
//! A store writes all six files into a hidden temporary directory next to the
//! record (metadata last) and renames it into place, so readers see either the
//! old record, the new one, or nothing.
//!
//! ### Reads
//! Expiration uses the timestamp stored in `pickled_meta`, not the directory
//! mtime, so copied or touched cache trees keep their age. Every payload is
//! checked against the recorded lengths and digest; any mismatch is a miss.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use super::{CacheStorage, CorruptRecord, StorageOptions};
use crate::Error;
use crate::config::CacheConfig;
use crate::headers::{headers_to_raw, raw_to_headers};
use crate::key::{CacheKey, Namespace};
use crate::record::{CacheRecord, RecordMeta};
use crate::request::Request;
use crate::response::Response;

pub const META_FILE: &str = "meta";
pub const PICKLED_META_FILE: &str = "pickled_meta";
pub const RESPONSE_HEADERS_FILE: &str = "response_headers";
pub const RESPONSE_BODY_FILE: &str = "response_body";
pub const REQUEST_HEADERS_FILE: &str = "request_headers";
pub const REQUEST_BODY_FILE: &str = "request_body";

/// Sequence for temporary directory names within this process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Machine-readable metadata: identity fields plus what the payloads must look like.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMeta {
    #[serde(flatten)]
    meta: RecordMeta,
    response_headers_len: u64,
    response_body_len: u64,
    request_headers_len: u64,
    request_body_len: u64,
    response_body_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Disk-backed engine rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
    options: StorageOptions,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>, options: StorageOptions) -> Self {
        Self { root: root.into(), options }
    }

    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConfigured` if the cache is disabled or `dir` is unset.
    pub fn from_config(config: &CacheConfig) -> Result<Self, Error> {
        if !config.enabled {
            return Err(Error::NotConfigured("cache disabled".into()));
        }
        let root = config.require_dir().map_err(|e| Error::NotConfigured(e.to_string()))?;
        Ok(Self::new(root, StorageOptions::from_config(config)))
    }

    pub fn namespace_path(&self, namespace: &Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    /// `root / namespace / key[0:2] / key`
    pub fn record_path(&self, namespace: &Namespace, key: &CacheKey) -> PathBuf {
        self.namespace_path(namespace).join(key.prefix()).join(key.as_str())
    }

    /// Record directory for `request`.
    pub fn request_path(&self, namespace: &Namespace, request: &Request) -> PathBuf {
        self.record_path(namespace, &self.options.key_for(request))
    }

    async fn read_stored_meta(dir: &Path) -> Result<Option<StoredMeta>, CorruptRecord> {
        let bytes = match fs::read(dir.join(PICKLED_META_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CorruptRecord::Unreadable { file: PICKLED_META_FILE, source }),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| CorruptRecord::Metadata(e.to_string()))
    }

    async fn read_record(dir: &Path, stored: StoredMeta) -> Result<CacheRecord, CorruptRecord> {
        let readable: RecordMeta = serde_json::from_slice(&read_payload(dir, META_FILE).await?)
            .map_err(|e| CorruptRecord::Metadata(format!("{META_FILE}: {e}")))?;
        if readable != stored.meta {
            return Err(CorruptRecord::Metadata(format!("{META_FILE} disagrees with {PICKLED_META_FILE}")));
        }

        let raw_headers = read_payload(dir, RESPONSE_HEADERS_FILE).await?;
        check_len(RESPONSE_HEADERS_FILE, stored.response_headers_len, raw_headers.len() as u64)?;

        let body = read_payload(dir, RESPONSE_BODY_FILE).await?;
        check_len(RESPONSE_BODY_FILE, stored.response_body_len, body.len() as u64)?;
        if sha256_hex(&body) != stored.response_body_sha256 {
            return Err(CorruptRecord::DigestMismatch);
        }

        let raw_request_headers = read_payload(dir, REQUEST_HEADERS_FILE).await?;
        check_len(REQUEST_HEADERS_FILE, stored.request_headers_len, raw_request_headers.len() as u64)?;
        let request_body = read_payload(dir, REQUEST_BODY_FILE).await?;
        check_len(REQUEST_BODY_FILE, stored.request_body_len, request_body.len() as u64)?;

        let RecordMeta { url, method, status, timestamp } = stored.meta;
        Ok(CacheRecord {
            url,
            method,
            status,
            timestamp,
            response_headers: raw_to_headers(&raw_headers),
            response_body: Bytes::from(body),
            request_headers: raw_to_headers(&raw_request_headers),
            request_body: Bytes::from(request_body),
        })
    }

    async fn write_record(dir: &Path, record: &CacheRecord) -> Result<(), Error> {
        let response_headers = headers_to_raw(&record.response_headers);
        let request_headers = headers_to_raw(&record.request_headers);
        let stored = StoredMeta {
            meta: record.meta(),
            response_headers_len: response_headers.len() as u64,
            response_body_len: record.response_body.len() as u64,
            request_headers_len: request_headers.len() as u64,
            request_body_len: record.request_body.len() as u64,
            response_body_sha256: sha256_hex(&record.response_body),
        };

        fs::write(dir.join(RESPONSE_HEADERS_FILE), &response_headers).await?;
        fs::write(dir.join(RESPONSE_BODY_FILE), &record.response_body).await?;
        fs::write(dir.join(REQUEST_HEADERS_FILE), &request_headers).await?;
        fs::write(dir.join(REQUEST_BODY_FILE), &record.request_body).await?;
        fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&stored.meta)?).await?;
        fs::write(dir.join(PICKLED_META_FILE), serde_json::to_vec(&stored)?).await?;
        Ok(())
    }

    /// Move `staged` to `dest`, replacing whatever is there.
    async fn swap_into_place(staged: &Path, dest: &Path, stale: &Path) -> Result<(), Error> {
        match fs::rename(dest, stale).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = fs::rename(staged, dest).await {
            let occupied = matches!(e.kind(), ErrorKind::DirectoryNotEmpty | ErrorKind::AlreadyExists);
            if occupied || fs::try_exists(dest.join(PICKLED_META_FILE)).await.unwrap_or(false) {
                // a concurrent store for the same key got there first
                tracing::debug!(path = %dest.display(), "record replaced concurrently, dropping staged copy");
                let _ = fs::remove_dir_all(staged).await;
            } else {
                return Err(e.into());
            }
        }

        if let Err(e) = fs::remove_dir_all(stale).await
            && e.kind() != ErrorKind::NotFound
        {
            tracing::debug!(path = %stale.display(), error = %e, "failed to remove replaced record");
        }
        Ok(())
    }
}

async fn read_payload(dir: &Path, file: &'static str) -> Result<Vec<u8>, CorruptRecord> {
    fs::read(dir.join(file)).await.map_err(|source| match source.kind() {
        ErrorKind::NotFound => CorruptRecord::Missing(file),
        _ => CorruptRecord::Unreadable { file, source },
    })
}

fn check_len(file: &'static str, expected: u64, actual: u64) -> Result<(), CorruptRecord> {
    if expected != actual {
        return Err(CorruptRecord::LengthMismatch { file, expected, actual });
    }
    Ok(())
}

fn is_staging_name(name: &str) -> bool {
    name.starts_with('.')
}

#[async_trait]
impl CacheStorage for FilesystemStorage {
    async fn retrieve(&self, namespace: &Namespace, request: &Request) -> Result<Option<Response>, Error> {
        let key = self.options.key_for(request);
        let dir = self.record_path(namespace, &key);

        let stored = match Self::read_stored_meta(&dir).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::debug!(namespace = %namespace, key = %key, "cache miss");
                return Ok(None);
            }
            Err(e) => {
                tracing::debug!(namespace = %namespace, key = %key, error = %e, "corrupt record treated as miss");
                return Ok(None);
            }
        };

        if self.options.expiration.is_expired(stored.meta.timestamp, Utc::now()) {
            tracing::debug!(namespace = %namespace, key = %key, written_at = %stored.meta.timestamp, "record expired");
            return Ok(None);
        }

        let response = match Self::read_record(&dir, stored).await.and_then(|r| self.options.build_response(r)) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(namespace = %namespace, key = %key, error = %e, "corrupt record treated as miss");
                return Ok(None);
            }
        };

        tracing::debug!(namespace = %namespace, key = %key, status = response.status, "cache hit");
        Ok(Some(response))
    }

    async fn store(&self, namespace: &Namespace, request: &Request, response: &Response) -> Result<(), Error> {
        let key = self.options.key_for(request);
        let dest = self.record_path(namespace, &key);
        let shard = self.namespace_path(namespace).join(key.prefix());
        fs::create_dir_all(&shard).await?;

        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let staged = shard.join(format!(".{key}.tmp-{pid}-{seq}"));
        let stale = shard.join(format!(".{key}.old-{pid}-{seq}"));

        fs::create_dir(&staged).await?;
        let record = CacheRecord::capture(request, response, Utc::now());
        let result = match Self::write_record(&staged, &record).await {
            Ok(()) => Self::swap_into_place(&staged, &dest, &stale).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = fs::remove_dir_all(&staged).await;
            return result;
        }

        tracing::debug!(namespace = %namespace, key = %key, status = record.status, "stored response");
        Ok(())
    }

    async fn purge_expired(&self, namespace: &Namespace) -> Result<u64, Error> {
        let ns_dir = self.namespace_path(namespace);
        let mut shards = match fs::read_dir(&ns_dir).await {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut removed = 0u64;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut records = fs::read_dir(shard.path()).await?;
            while let Some(entry) = records.next_entry().await? {
                if is_staging_name(&entry.file_name().to_string_lossy()) || !entry.file_type().await?.is_dir() {
                    continue;
                }
                let dir = entry.path();
                let purge = match Self::read_stored_meta(&dir).await {
                    Ok(Some(stored)) => self.options.expiration.is_expired(stored.meta.timestamp, now),
                    Ok(None) | Err(_) => true,
                };
                if purge {
                    match fs::remove_dir_all(&dir).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        tracing::info!(namespace = %namespace, removed, "purged expired records");
        Ok(removed)
    }
}
