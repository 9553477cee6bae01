//! Response-type inference.
//!
//! Picks the representation a reconstructed response should carry from its
//! headers and URL. Storage engines receive the strategy as a trait object so
//! it can be swapped for a stub.

use serde::{Deserialize, Serialize};

use crate::headers::Headers;

/// Representation of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Html,
    Xml,
    Json,
    Text,
    #[default]
    Binary,
}

impl ResponseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseKind::Html => "html",
            ResponseKind::Xml => "xml",
            ResponseKind::Json => "json",
            ResponseKind::Text => "text",
            ResponseKind::Binary => "binary",
        }
    }
}

/// Strategy that infers a [`ResponseKind`].
pub trait ResponseTypeResolver: Send + Sync {
    fn resolve(&self, headers: &Headers, url: &str) -> ResponseKind;
}

impl<F> ResponseTypeResolver for F
where
    F: Fn(&Headers, &str) -> ResponseKind + Send + Sync,
{
    fn resolve(&self, headers: &Headers, url: &str) -> ResponseKind {
        self(headers, url)
    }
}

/// Default resolver: `Content-Type`, then the `Content-Disposition` filename,
/// then the URL path extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentTypeResolver;

impl ResponseTypeResolver for ContentTypeResolver {
    fn resolve(&self, headers: &Headers, url: &str) -> ResponseKind {
        if let Some(kind) = headers.get("content-type").and_then(from_mime_type) {
            return kind;
        }
        if let Some(kind) = headers.get("content-disposition").and_then(disposition_filename).and_then(from_filename) {
            return kind;
        }
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
            .and_then(|name| from_filename(&name))
            .unwrap_or_default()
    }
}

fn from_mime_type(value: &str) -> Option<ResponseKind> {
    let mime = value.split(';').next()?.trim().to_ascii_lowercase();
    if mime.is_empty() {
        return None;
    }
    let kind = match mime.as_str() {
        "text/html" | "application/xhtml+xml" => ResponseKind::Html,
        "text/xml" | "application/xml" | "application/rss+xml" | "application/atom+xml" => ResponseKind::Xml,
        "application/json" | "text/json" => ResponseKind::Json,
        m if m.ends_with("+json") => ResponseKind::Json,
        m if m.ends_with("+xml") => ResponseKind::Xml,
        m if m.starts_with("text/") => ResponseKind::Text,
        "application/javascript" | "application/x-javascript" => ResponseKind::Text,
        _ => ResponseKind::Binary,
    };
    Some(kind)
}

fn disposition_filename(value: &str) -> Option<&str> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"'))
}

fn from_filename(name: &str) -> Option<ResponseKind> {
    let (_, ext) = name.rsplit_once('.')?;
    let kind = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" | "xhtml" => ResponseKind::Html,
        "xml" | "rss" | "atom" => ResponseKind::Xml,
        "json" => ResponseKind::Json,
        "txt" | "csv" | "css" | "js" => ResponseKind::Text,
        _ => return None,
    };
    Some(kind)
}
