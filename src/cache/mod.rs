//! In-memory HTTP response cache.
//!
//! Entries carry the response body, the response headers with hop-by-hop
//! headers removed, and an absolute expiry instant. The store keys entries
//! by `METHOD|HOST|PATH?QUERY` plus an optional variant derived from the
//! response `Vary` header; see [`storage::ResponseCache`].

use bytes::Bytes;
use hyper::HeaderMap;
use std::time::Instant;

pub mod policy;
pub mod storage;

pub use policy::{cacheability, determine_ttl, is_cachable};
pub use storage::ResponseCache;

/// Hop-by-hop headers, removed on store and on every cross-hop copy
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Check whether a header must not be forwarded across a proxy hop
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Copy of `headers` with the hop-by-hop set removed
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Cached response entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    body: Bytes,
    headers: HeaderMap,
    expires_at: Instant,
}

impl CacheEntry {
    /// Create a new cache entry. Hop-by-hop headers are stripped so stored
    /// state never carries them regardless of the caller.
    pub fn new(body: Bytes, headers: HeaderMap, expires_at: Instant) -> Self {
        Self {
            body,
            headers: strip_hop_by_hop(&headers),
            expires_at,
        }
    }

    /// Check if this entry is expired
    pub fn is_expired(&self) -> bool {
        self.expired_at(Instant::now())
    }

    pub(crate) fn expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Independent copies of the stored body and headers
    pub fn into_parts(self) -> (Bytes, HeaderMap) {
        (self.body, self.headers)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_is_hop_by_hop() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(is_hop_by_hop("TE"));
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Cache-Control"));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("upgrade", "websocket".parse().unwrap());
        headers.append("accept", "text/html".parse().unwrap());
        headers.append("accept", "application/json".parse().unwrap());

        let stripped = strip_hop_by_hop(&headers);
        assert!(stripped.contains_key("content-type"));
        assert!(!stripped.contains_key("connection"));
        assert!(!stripped.contains_key("upgrade"));
        assert_eq!(stripped.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_strip_hop_by_hop_idempotent() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        headers.insert("connection", "close".parse().unwrap());

        let once = strip_hop_by_hop(&headers);
        let twice = strip_hop_by_hop(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let now = Instant::now();
        let entry = CacheEntry::new(Bytes::from_static(b"x"), HeaderMap::new(), now);

        // Exactly at expires_at the entry is treated as expired
        assert!(entry.expired_at(now));
        assert!(!entry.expired_at(now - Duration::from_millis(1)));
    }

    #[test]
    fn test_entry_strips_hop_by_hop_on_construction() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("etag", "\"abc\"".parse().unwrap());

        let entry = CacheEntry::new(
            Bytes::from_static(b"body"),
            headers,
            Instant::now() + Duration::from_secs(60),
        );
        assert!(!entry.headers().contains_key("transfer-encoding"));
        assert!(entry.headers().contains_key("etag"));
    }
}
