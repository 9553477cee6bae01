//! Persisted cache record and the expiration rule applied on read.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::headers::Headers;
use crate::request::Request;
use crate::response::Response;

/// Record lifetime measured from its write timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    #[default]
    Never,
    After(Duration),
}

impl Expiration {
    /// Negative seconds mean records never expire.
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) => Expiration::After(Duration::from_secs(secs)),
            Err(_) => Expiration::Never,
        }
    }

    /// A record is expired once strictly more than the window has elapsed.
    ///
    /// Timestamps in the future count as age zero.
    pub fn is_expired(&self, written_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Expiration::Never => false,
            Expiration::After(window) => {
                let age = now.signed_duration_since(written_at).to_std().unwrap_or(Duration::ZERO);
                age > *window
            }
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Expiration::Never)
    }
}

/// Identity fields of a record, written once per store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
}

/// The persisted unit: response identity, payloads, and the originating request.
///
/// Request headers and body are kept for diagnostics and never consulted when
/// deciding a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    pub response_headers: Headers,
    pub response_body: Bytes,
    pub request_headers: Headers,
    pub request_body: Bytes,
}

impl CacheRecord {
    /// Capture a request/response pair as written at `timestamp`.
    ///
    /// `url` is the response URL, which differs from the request URL after a redirect.
    pub fn capture(request: &Request, response: &Response, timestamp: DateTime<Utc>) -> Self {
        Self {
            url: response.url.to_string(),
            method: request.method.clone(),
            status: response.status,
            timestamp,
            response_headers: response.headers.clone(),
            response_body: response.body.clone(),
            request_headers: request.headers.clone(),
            request_body: request.body.clone(),
        }
    }

    pub fn meta(&self) -> RecordMeta {
        RecordMeta { url: self.url.clone(), method: self.method.clone(), status: self.status, timestamp: self.timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_from_secs() {
        assert_eq!(Expiration::from_secs(-1), Expiration::Never);
        assert_eq!(Expiration::from_secs(i64::MIN), Expiration::Never);
        assert_eq!(Expiration::from_secs(0), Expiration::After(Duration::ZERO));
        assert_eq!(Expiration::from_secs(30), Expiration::After(Duration::from_secs(30)));
    }

    #[test]
    fn test_never_expires() {
        let written = Utc::now() - TimeDelta::days(3650);
        assert!(!Expiration::Never.is_expired(written, Utc::now()));
    }

    #[test]
    fn test_window_boundary() {
        let now = Utc::now();
        let exp = Expiration::from_secs(60);
        assert!(!exp.is_expired(now - TimeDelta::seconds(60), now));
        assert!(exp.is_expired(now - TimeDelta::seconds(61), now));
    }

    #[test]
    fn test_zero_window() {
        let now = Utc::now();
        let exp = Expiration::from_secs(0);
        assert!(!exp.is_expired(now, now));
        assert!(exp.is_expired(now - TimeDelta::milliseconds(1), now));
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let now = Utc::now();
        assert!(!Expiration::from_secs(0).is_expired(now + TimeDelta::hours(1), now));
    }

    #[test]
    fn test_capture_uses_response_url() {
        let request = Request::get("http://example.test/old").unwrap().with_header("Accept", "*/*");
        let response = Response::new(url::Url::parse("http://example.test/new").unwrap(), 301, Headers::new(), "");
        let now = Utc::now();
        let record = CacheRecord::capture(&request, &response, now);
        assert_eq!(record.url, "http://example.test/new");
        assert_eq!(record.method, "GET");
        assert_eq!(record.status, 301);
        assert_eq!(record.request_headers.get("accept"), Some("*/*"));
        assert_eq!(record.meta().timestamp, now);
    }
}
