//! Namespace and key identifiers.
//!
//! Both end up as path components in the filesystem engine, so both are
//! validated on construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

fn is_path_safe(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.chars().any(|c| matches!(c, '/' | '\\' | '\0'))
}

/// Logical cache partition, one per crawl target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if !is_path_safe(&name) {
            return Err(Error::InvalidNamespace(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Namespace {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Namespace::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request fingerprint used as the record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Validate a fingerprint: at least two characters, usable as a path component.
    ///
    /// A leading `.` is rejected: the shard prefix could be `..`, and dot-names
    /// are reserved for staging directories.
    pub fn new(key: impl Into<String>) -> Result<Self, Error> {
        let key = key.into();
        if key.chars().count() < 2 || key.starts_with('.') || !is_path_safe(&key) {
            return Err(Error::InvalidKey(key));
        }
        Ok(Self(key))
    }

    /// Hex digests are always long enough and path-safe.
    pub(crate) fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two-character shard directory name.
    pub fn prefix(&self) -> &str {
        let end = self.0.char_indices().nth(2).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl TryFrom<String> for CacheKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CacheKey::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_valid() {
        assert_eq!(Namespace::new("example.com").unwrap().as_str(), "example.com");
        assert_eq!(Namespace::new("spider-1").unwrap().to_string(), "spider-1");
    }

    #[test]
    fn test_namespace_rejects_paths() {
        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            assert!(matches!(Namespace::new(bad), Err(Error::InvalidNamespace(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_key_prefix() {
        let key = CacheKey::new("abcdef").unwrap();
        assert_eq!(key.prefix(), "ab");
        assert_eq!(CacheKey::new("ab").unwrap().prefix(), "ab");
    }

    #[test]
    fn test_key_rejects_short_and_unsafe() {
        assert!(matches!(CacheKey::new("a"), Err(Error::InvalidKey(_))));
        assert!(matches!(CacheKey::new(".."), Err(Error::InvalidKey(_))));
        assert!(matches!(CacheKey::new("ab/cd"), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_key_rejects_leading_dot() {
        for bad in ["..x", "..escape", ".ab"] {
            assert!(matches!(CacheKey::new(bad), Err(Error::InvalidKey(_))), "{bad:?}");
        }
        assert_eq!(CacheKey::new("a.b").unwrap().prefix(), "a.");
    }

    #[test]
    fn test_namespace_deserialize_validates() {
        let ok: Namespace = serde_json::from_str("\"site\"").unwrap();
        assert_eq!(ok.as_str(), "site");
        assert!(serde_json::from_str::<Namespace>("\"../etc\"").is_err());
    }
}
