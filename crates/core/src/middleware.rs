//! Cache interception policy.
//!
//! Sits between the pipeline and a [`CacheStorage`] engine:
//!
//! - before a request is sent, serve it from the cache when possible
//! - after a response arrives, capture it for next time
//!
//! Only `http` and `https` requests are cacheable. Status codes are not
//! filtered here; error responses are cached like any other.

use std::sync::Arc;

use crate::Error;
use crate::config::CacheConfig;
use crate::key::Namespace;
use crate::request::Request;
use crate::response::{CACHED_FLAG, Response};
use crate::storage::{self, CacheStorage};

/// URL schemes the cache will serve and store.
pub const CACHEABLE_SCHEMES: &[&str] = &["http", "https"];

/// Decides cacheability and drives lookup-before-send and store-after-receive.
#[derive(Clone)]
pub struct HttpCacheMiddleware {
    storage: Arc<dyn CacheStorage>,
    ignore_missing: bool,
}

impl std::fmt::Debug for HttpCacheMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCacheMiddleware").field("ignore_missing", &self.ignore_missing).finish_non_exhaustive()
    }
}

impl HttpCacheMiddleware {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage, ignore_missing: false }
    }

    /// Strict mode: misses fail with `Error::CacheMiss` instead of going to the network.
    pub fn with_ignore_missing(mut self, ignore_missing: bool) -> Self {
        self.ignore_missing = ignore_missing;
        self
    }

    /// Build the middleware and the storage engine selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConfigured` when caching is disabled or lacks a
    /// directory, and storage errors if the engine cannot be opened.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, Error> {
        let storage = storage::open(config).await?;
        Ok(Self::new(storage).with_ignore_missing(config.ignore_missing))
    }

    /// Like [`from_config`](Self::from_config), but a missing configuration
    /// yields `Ok(None)` so the pipeline can run without a cache.
    pub async fn from_config_optional(config: &CacheConfig) -> Result<Option<Self>, Error> {
        match Self::from_config(config).await {
            Ok(middleware) => Ok(Some(middleware)),
            Err(Error::NotConfigured(reason)) => {
                tracing::info!(%reason, "http cache disabled");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn ignore_missing(&self) -> bool {
        self.ignore_missing
    }

    /// Start of a crawl session for `namespace`.
    pub async fn open_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        tracing::info!(namespace = %namespace, "opening cache namespace");
        self.storage.open_namespace(namespace).await
    }

    /// End of a crawl session for `namespace`.
    pub async fn close_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        tracing::info!(namespace = %namespace, "closing cache namespace");
        self.storage.close_namespace(namespace).await
    }

    /// True iff the request's scheme is `http` or `https`.
    pub fn is_cacheable(&self, request: &Request) -> bool {
        CACHEABLE_SCHEMES.contains(&request.scheme())
    }

    /// Look `request` up before it is sent.
    ///
    /// `Some` is a complete substitute for the network response, flagged as
    /// cached. `None` means send the request.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheMiss` in strict mode when a cacheable request has no
    /// record, and storage errors from the engine.
    pub async fn before_request(&self, request: &Request, namespace: &Namespace) -> Result<Option<Response>, Error> {
        if !self.is_cacheable(request) {
            return Ok(None);
        }

        match self.storage.retrieve(namespace, request).await? {
            Some(mut response) => {
                response.add_flag(CACHED_FLAG);
                Ok(Some(response))
            }
            None if self.ignore_missing => Err(Error::CacheMiss(format!("ignored request not in cache: {request}"))),
            None => Ok(None),
        }
    }

    /// Capture `response` after it was received and hand it back unchanged.
    ///
    /// Responses that already carry the cached flag came from this cache and
    /// are not written again. Storage failures are logged, never returned.
    pub async fn after_response(&self, request: &Request, response: Response, namespace: &Namespace) -> Response {
        if !self.is_cacheable(request) || response.is_cached() {
            return response;
        }

        if let Err(e) = self.storage.store(namespace, request, &response).await {
            tracing::warn!(namespace = %namespace, request = %request, error = %e, "failed to store response in cache");
        }
        response
    }
}
