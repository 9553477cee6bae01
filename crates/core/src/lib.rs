//! Core types for the on-disk HTTP response cache.
//!
//! This crate provides:
//! - Request/response models and the header codec
//! - Request fingerprinting into cache keys
//! - Storage engines (filesystem, SQLite, memory)
//! - The cache middleware that serves hits and captures responses
//! - Configuration loaded from environment and TOML

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod key;
pub mod middleware;
pub mod record;
pub mod request;
pub mod response;
pub mod responsetypes;
pub mod storage;

pub use config::{CacheConfig, ConfigError, StorageKind};
pub use error::Error;
pub use fingerprint::{Fingerprinter, Sha256Fingerprinter};
pub use headers::Headers;
pub use key::{CacheKey, Namespace};
pub use middleware::HttpCacheMiddleware;
pub use record::{CacheRecord, Expiration};
pub use request::Request;
pub use response::{CACHED_FLAG, Response};
pub use responsetypes::{ContentTypeResolver, ResponseKind, ResponseTypeResolver};
pub use storage::{CacheStorage, FilesystemStorage, MemoryStorage, SqliteStorage, StorageOptions};
