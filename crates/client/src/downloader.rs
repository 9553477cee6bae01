//! Download pipeline with an optional response cache in front of the transport.

use httpcache_core::{Error, HttpCacheMiddleware, Namespace, Request, Response};

use crate::transport::Transport;

/// Sends requests through the cache middleware (when configured) and a [`Transport`].
pub struct Downloader<T> {
    transport: T,
    cache: Option<HttpCacheMiddleware>,
}

impl<T: Transport> Downloader<T> {
    pub fn new(transport: T, cache: Option<HttpCacheMiddleware>) -> Self {
        Self { transport, cache }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start a crawl session for `namespace`.
    pub async fn open(&self, namespace: &Namespace) -> Result<(), Error> {
        match &self.cache {
            Some(cache) => cache.open_namespace(namespace).await,
            None => Ok(()),
        }
    }

    /// End a crawl session for `namespace`.
    pub async fn close(&self, namespace: &Namespace) -> Result<(), Error> {
        match &self.cache {
            Some(cache) => cache.close_namespace(namespace).await,
            None => Ok(()),
        }
    }

    /// Fetch `request`, serving it from the cache when a record exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheMiss` in strict mode, and transport errors otherwise.
    /// Cache store failures are logged and do not fail the fetch.
    pub async fn fetch(&self, request: &Request, namespace: &Namespace) -> Result<Response, Error> {
        let Some(cache) = &self.cache else {
            return self.transport.send(request).await;
        };

        if let Some(response) = cache.before_request(request, namespace).await? {
            return Ok(response);
        }

        let response = self.transport.send(request).await?;
        Ok(cache.after_response(request, response, namespace).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use httpcache_core::{CacheConfig, Headers, MemoryStorage, StorageOptions};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every request with a fixed page and counts the calls.
    #[derive(Default)]
    struct MockTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &Request) -> Result<Response, Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let headers: Headers = [("Content-Type", "text/plain")].into_iter().collect();
            Ok(Response::new(request.url.clone(), 200, headers, format!("call {n}")))
        }
    }

    fn ns() -> Namespace {
        Namespace::new("example.test").unwrap()
    }

    fn memory_cache() -> HttpCacheMiddleware {
        HttpCacheMiddleware::new(Arc::new(MemoryStorage::new(StorageOptions::default())))
    }

    #[tokio::test]
    async fn test_second_fetch_served_from_cache() {
        let downloader = Downloader::new(MockTransport::default(), Some(memory_cache()));
        let request = Request::get("http://example.test/a").unwrap();
        downloader.open(&ns()).await.unwrap();

        let first = downloader.fetch(&request, &ns()).await.unwrap();
        let second = downloader.fetch(&request, &ns()).await.unwrap();
        downloader.close(&ns()).await.unwrap();

        assert!(!first.is_cached());
        assert!(second.is_cached());
        assert_eq!(second.body, first.body);
        assert_eq!(downloader.transport().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_cache_always_sends() {
        let downloader = Downloader::new(MockTransport::default(), None);
        let request = Request::get("http://example.test/a").unwrap();
        downloader.open(&ns()).await.unwrap();

        downloader.fetch(&request, &ns()).await.unwrap();
        let second = downloader.fetch(&request, &ns()).await.unwrap();

        assert!(!second.is_cached());
        assert_eq!(second.text(), "call 2");
        assert_eq!(downloader.transport().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_strict_mode_never_sends() {
        let cache = memory_cache().with_ignore_missing(true);
        let downloader = Downloader::new(MockTransport::default(), Some(cache));
        let request = Request::get("http://example.test/a").unwrap();

        let result = downloader.fetch(&request, &ns()).await;
        assert!(matches!(result, Err(Error::CacheMiss(_))));
        assert_eq!(downloader.transport().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filesystem_cache_shared_between_downloaders() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CacheConfig::with_dir(tmp.path());
        let request = Request::get("https://example.test/shared").unwrap();

        let cache = HttpCacheMiddleware::from_config_optional(&config).await.unwrap();
        let warm = Downloader::new(MockTransport::default(), cache);
        warm.fetch(&request, &ns()).await.unwrap();

        let cache = HttpCacheMiddleware::from_config_optional(&config).await.unwrap();
        let cold = Downloader::new(MockTransport::default(), cache);
        let response = cold.fetch(&request, &ns()).await.unwrap();

        assert!(response.is_cached());
        assert_eq!(response.text(), "call 1");
        assert_eq!(cold.transport().calls.load(Ordering::SeqCst), 0);
    }
}
