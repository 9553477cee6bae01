//! Network transport for the download pipeline.
//!
//! ### Limits
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)
//! - Timeout: 20s
//!
//! Non-success statuses are returned as responses, not errors, so they can be
//! cached like any other.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, header};

use httpcache_core::{ContentTypeResolver, Error, Headers, Request, Response, ResponseTypeResolver};

/// Sends a request over the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, Error>;
}

/// Configuration for the reqwest transport.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "httpcache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "httpcache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
    config: FetchConfig,
}

impl ReqwestTransport {
    /// Create a transport with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    fn too_large(&self, len: usize) -> Error {
        Error::FetchTooLarge(format!("{len} bytes exceeds {}", self.config.max_bytes))
    }
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() { Error::FetchTimeout(e.to_string()) } else { Error::HttpError(format!("network error: {e}")) }
}

fn convert_headers(map: &header::HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    headers
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<Response, Error> {
        let start = Instant::now();
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::HttpError(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self.http.request(method, request.url.clone());
        for (name, values) in request.headers.iter() {
            for value in values {
                builder = builder.header(name, value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(map_send_error)?;

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(self.too_large(len as usize));
        }

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = convert_headers(response.headers());

        let body = response.bytes().await.map_err(map_send_error)?;
        if body.len() > self.config.max_bytes {
            return Err(self.too_large(body.len()));
        }

        let kind = ContentTypeResolver.resolve(&headers, final_url.as_str());
        let fetch_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(request = %request, final_url = %final_url, status, bytes = body.len(), fetch_ms, "fetched");

        Ok(Response::new(final_url, status, headers, body).with_kind(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpcache_core::ResponseKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP/1.1 response on a local port.
    async fn serve_once(raw: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(raw.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/page")
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "httpcache/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_convert_headers_keeps_repeats() {
        let mut map = header::HeaderMap::new();
        map.append(header::SET_COOKIE, "a=1".parse().unwrap());
        map.append(header::SET_COOKIE, "b=2".parse().unwrap());
        let headers = convert_headers(&map);
        assert_eq!(headers.get_all("Set-Cookie"), ["a=1".to_string(), "b=2".to_string()]);
    }

    #[tokio::test]
    async fn test_send_returns_error_statuses() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
        )
        .await;
        let transport = ReqwestTransport::new(FetchConfig::default()).unwrap();
        let response = transport.send(&Request::get(&url).unwrap()).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.body.as_ref(), b"not found");
        assert_eq!(response.kind, ResponseKind::Html);
        assert!(!response.is_cached());
    }

    #[tokio::test]
    async fn test_send_rejects_large_body() {
        let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 16\r\nConnection: close\r\n\r\n0123456789abcdef").await;
        let config = FetchConfig { max_bytes: 8, ..Default::default() };
        let transport = ReqwestTransport::new(config).unwrap();
        let result = transport.send(&Request::get(&url).unwrap()).await;
        assert!(matches!(result, Err(Error::FetchTooLarge(_))));
    }
}
