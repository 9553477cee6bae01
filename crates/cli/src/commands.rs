//! Subcommand implementations.

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::json;

use httpcache_client::{Downloader, FetchConfig, ReqwestTransport};
use httpcache_core::{CacheConfig, HttpCacheMiddleware, Namespace, Request, Response, storage};

const DEFAULT_NAMESPACE: &str = "default";

/// One line of `fetch` output.
#[derive(Debug, Serialize)]
struct FetchLine<'a> {
    url: &'a str,
    status: u16,
    bytes: usize,
    kind: &'static str,
    cached: bool,
}

/// Namespace from the flag, else the request host, else `default`.
fn resolve_namespace(explicit: Option<&str>, request: &Request) -> Result<Namespace> {
    let name = explicit.or_else(|| request.url.host_str()).unwrap_or(DEFAULT_NAMESPACE);
    Namespace::new(name).with_context(|| format!("invalid namespace for {}", request.url))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub async fn fetch(config: &CacheConfig, fetch: FetchConfig, urls: &[String], namespace: Option<&str>) -> Result<()> {
    let cache = HttpCacheMiddleware::from_config_optional(config).await?;
    let downloader = Downloader::new(ReqwestTransport::new(fetch)?, cache);

    let mut jobs = Vec::with_capacity(urls.len());
    for url in urls {
        let request = Request::get(url)?;
        let ns = resolve_namespace(namespace, &request)?;
        jobs.push((request, ns));
    }

    let namespaces: BTreeSet<Namespace> = jobs.iter().map(|(_, ns)| ns.clone()).collect();
    for ns in &namespaces {
        downloader.open(ns).await?;
    }

    let mut failed = 0usize;
    for (request, ns) in &jobs {
        match downloader.fetch(request, ns).await {
            Ok(response) => print_json(&fetch_line(&response))?,
            Err(e) => {
                failed += 1;
                tracing::warn!(request = %request, error = %e, "fetch failed");
                print_json(&json!({ "url": request.url.as_str(), "error": e.to_string() }))?;
            }
        }
    }

    for ns in &namespaces {
        downloader.close(ns).await?;
    }

    if failed > 0 {
        bail!("{failed} of {} fetches failed", jobs.len());
    }
    Ok(())
}

fn fetch_line(response: &Response) -> FetchLine<'_> {
    FetchLine {
        url: response.url.as_str(),
        status: response.status,
        bytes: response.body.len(),
        kind: response.kind.as_str(),
        cached: response.is_cached(),
    }
}

pub async fn show(config: &CacheConfig, url: &str, namespace: Option<&str>, method: &str) -> Result<()> {
    let storage = storage::open(config).await.context("cache is not available")?;
    let request = Request::new(method, Request::get(url)?.url);
    let ns = resolve_namespace(namespace, &request)?;

    match storage.retrieve(&ns, &request).await? {
        Some(response) => {
            let headers: serde_json::Map<String, serde_json::Value> =
                response.headers.iter().map(|(name, values)| (name.to_string(), json!(values))).collect();
            print_json(&json!({
                "namespace": ns.as_str(),
                "request": request.to_string(),
                "url": response.url.as_str(),
                "status": response.status,
                "kind": response.kind.as_str(),
                "bytes": response.body.len(),
                "headers": headers,
            }))
        }
        None => print_json(&json!({ "namespace": ns.as_str(), "request": request.to_string(), "cached": false })),
    }
}

pub async fn purge(config: &CacheConfig, namespace: &str) -> Result<()> {
    let storage = storage::open(config).await.context("cache is not available")?;
    let ns = Namespace::new(namespace)?;
    let purged = storage.purge_expired(&ns).await?;
    tracing::info!(namespace = %ns, purged, "purged cache namespace");
    print_json(&json!({ "namespace": ns.as_str(), "purged": purged }))
}
