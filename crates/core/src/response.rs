//! Response handed back to the pipeline, either fetched or served from the cache.

use bytes::Bytes;
use url::Url;

use crate::headers::Headers;
use crate::responsetypes::ResponseKind;

/// Provenance flag set on responses served from the cache.
pub const CACHED_FLAG: &str = "cached";

/// A response with its inferred representation and pipeline flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    pub kind: ResponseKind,
    pub flags: Vec<String>,
}

impl Response {
    pub fn new(url: Url, status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self { url, status, headers, body: body.into(), kind: ResponseKind::default(), flags: Vec::new() }
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Add a flag once; repeated calls are no-ops.
    pub fn add_flag(&mut self, flag: &str) {
        if !self.has_flag(flag) {
            self.flags.push(flag.to_string());
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Whether this response was served from the cache.
    pub fn is_cached(&self) -> bool {
        self.has_flag(CACHED_FLAG)
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
