//! Request fingerprinting.
//!
//! The fingerprint is the record key: requests that are equivalent for caching
//! must hash to the same value.

use sha2::{Digest, Sha256};
use url::Url;

use crate::key::CacheKey;
use crate::request::Request;

/// Deterministic request-to-key function.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, request: &Request) -> CacheKey;
}

/// SHA-256 over method, canonical URL, body and selected headers.
#[derive(Debug, Clone, Default)]
pub struct Sha256Fingerprinter {
    /// Header names (case-insensitive) folded into the key, in this order.
    include_headers: Vec<String>,
}

impl Sha256Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { include_headers: names.into_iter().map(|n| n.as_ref().to_ascii_lowercase()).collect() }
    }
}

impl Fingerprinter for Sha256Fingerprinter {
    fn fingerprint(&self, request: &Request) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(request.method.to_ascii_uppercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(canonicalize_url(&request.url).as_bytes());
        hasher.update(b"\n");
        hasher.update(&request.body);
        for name in &self.include_headers {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            for value in request.headers.get_all(name) {
                hasher.update(b"\0");
                hasher.update(value.as_bytes());
            }
        }
        CacheKey::from_digest(hex::encode(hasher.finalize()))
    }
}

/// Canonical form of a URL for fingerprinting.
///
/// `url` already lowercases scheme and host and drops default ports. On top of
/// that the fragment is removed and query pairs are sorted, keeping blank
/// values.
pub fn canonicalize_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    if canonical.query().is_some() {
        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        pairs.sort();
        if pairs.is_empty() {
            canonical.set_query(None);
        } else {
            canonical.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }
    canonical.to_string()
}
