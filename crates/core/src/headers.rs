//! Ordered, case-insensitive header multi-map and its raw wire codec.
//!
//! Names keep the spelling they were first inserted with and the order in
//! which they first appeared. Repeated names append to the existing entry.

use serde::{Deserialize, Serialize};

/// Ordered multi-map of header name to values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Replace all values for `name` with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = vec![value.into()],
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values for `name`, empty when absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(name).map(|idx| self.entries[idx].1.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, values)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Serialize headers to a raw wire-format block, one `Name: value\r\n` line per value.
pub fn headers_to_raw(headers: &Headers) -> Vec<u8> {
    let mut raw = Vec::new();
    for (name, values) in headers.iter() {
        for value in values {
            raw.extend_from_slice(name.as_bytes());
            raw.extend_from_slice(b": ");
            raw.extend_from_slice(value.as_bytes());
            raw.extend_from_slice(b"\r\n");
        }
    }
    raw
}

/// Parse a raw header block.
///
/// Accepts `\r\n` or bare `\n` line endings. Lines without a colon and lines
/// with an empty name are skipped. Bytes that are not valid UTF-8 are replaced.
///
/// The value is everything after the `": "` separator, so blocks written by
/// [`headers_to_raw`] round-trip exactly, surrounding whitespace included.
/// Without the space after the colon, leading whitespace is dropped.
pub fn raw_to_headers(raw: &[u8]) -> Headers {
    let text = String::from_utf8_lossy(raw);
    let mut headers = Headers::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.strip_prefix(' ').unwrap_or_else(|| value.trim_start());
        headers.append(name, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/html");
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_append_keeps_first_spelling_and_order() {
        let headers: Headers =
            [("Set-Cookie", "a=1"), ("Server", "test"), ("set-cookie", "b=2")].into_iter().collect();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Set-Cookie", "Server"]);
        assert_eq!(headers.get_all("Set-Cookie"), &["a=1".to_string(), "b=2".to_string()]);
    }

    #[test]
    fn test_insert_replaces() {
        let mut headers = Headers::new();
        headers.append("Accept", "text/html");
        headers.append("Accept", "*/*");
        headers.insert("accept", "application/json");
        assert_eq!(headers.get_all("Accept"), &["application/json".to_string()]);
    }

    #[test]
    fn test_raw_format() {
        let headers: Headers = [("Content-Type", "text/html"), ("X-Multi", "1"), ("X-Multi", "2")].into_iter().collect();
        let raw = headers_to_raw(&headers);
        assert_eq!(raw, b"Content-Type: text/html\r\nX-Multi: 1\r\nX-Multi: 2\r\n".to_vec());
        assert_eq!(raw_to_headers(&raw), headers);
    }

    #[test]
    fn test_raw_keeps_value_whitespace() {
        let headers: Headers = [("X-Padded", " x "), ("X-Empty", "")].into_iter().collect();
        assert_eq!(raw_to_headers(&headers_to_raw(&headers)), headers);
        assert_eq!(raw_to_headers(b"X-Tight:v\r\n").get("x-tight"), Some("v"));
    }

    #[test]
    fn test_raw_value_with_colon() {
        let headers = raw_to_headers(b"Location: http://example.test:8080/x\r\n");
        assert_eq!(headers.get("location"), Some("http://example.test:8080/x"));
    }

    #[test]
    fn test_raw_skips_garbage_lines() {
        let headers = raw_to_headers(b"HTTP/1.1 200 OK\nServer: x\n: nameless\n\n");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("server"), Some("x"));
    }

    #[test]
    fn test_empty() {
        assert!(headers_to_raw(&Headers::new()).is_empty());
        assert!(raw_to_headers(b"").is_empty());
    }
}
