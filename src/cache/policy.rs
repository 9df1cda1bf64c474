//! Cacheability rules and TTL derivation.

use chrono::DateTime;
use hyper::header::{CACHE_CONTROL, EXPIRES, SET_COOKIE, VARY};
use hyper::{HeaderMap, Method, StatusCode};
use std::time::Duration;

/// Decide whether a response may be stored. Returns `None` when cacheable,
/// otherwise a short reason suitable for the access log.
pub fn cacheability(
    method: &Method,
    status: StatusCode,
    response_headers: &HeaderMap,
) -> Option<&'static str> {
    if method != Method::GET && method != Method::HEAD {
        return Some("method not cacheable");
    }

    if !status.is_success() {
        return Some("status not cacheable");
    }

    if let Some(cache_control) = joined_header(response_headers, CACHE_CONTROL.as_str()) {
        let cache_control = cache_control.to_ascii_lowercase();
        if cache_control.contains("no-store") {
            return Some("cache-control: no-store");
        }
        if cache_control.contains("private") {
            return Some("cache-control: private");
        }
    }

    if let Some(vary) = joined_header(response_headers, VARY.as_str()) {
        if vary.split(',').any(|name| name.trim() == "*") {
            return Some("vary: *");
        }
    }

    if response_headers.contains_key(SET_COOKIE) {
        return Some("set-cookie present");
    }

    None
}

/// True iff the admission predicate holds for this response
pub fn is_cachable(method: &Method, status: StatusCode, response_headers: &HeaderMap) -> bool {
    cacheability(method, status, response_headers).is_none()
}

/// Derive the freshness lifetime of a response.
///
/// Precedence: `Cache-Control: max-age` with a positive value, then a
/// future `Expires` date, then `default_ttl`. The result is capped at
/// `max_age`.
pub fn determine_ttl(response_headers: &HeaderMap, default_ttl: Duration, max_age: Duration) -> Duration {
    let mut ttl = Duration::ZERO;

    if let Some(cache_control) = joined_header(response_headers, CACHE_CONTROL.as_str()) {
        ttl = parse_max_age(&cache_control.to_ascii_lowercase());
    }

    if ttl == Duration::ZERO {
        if let Some(expires) = response_headers.get(EXPIRES).and_then(|v| v.to_str().ok()) {
            if let Ok(when) = DateTime::parse_from_rfc2822(expires) {
                let remaining = when.signed_duration_since(chrono::Utc::now());
                if let Ok(remaining) = remaining.to_std() {
                    ttl = remaining;
                }
            }
        }
    }

    if ttl == Duration::ZERO {
        ttl = default_ttl;
    }

    ttl.min(max_age)
}

/// Extract a positive `max-age=<N>` directive, or zero when absent/invalid
pub fn parse_max_age(cache_control: &str) -> Duration {
    for directive in cache_control.split(',') {
        if let Some(value) = directive.trim().strip_prefix("max-age=") {
            if let Ok(seconds) = value.parse::<i64>() {
                if seconds > 0 {
                    return Duration::from_secs(seconds as u64);
                }
            }
        }
    }
    Duration::ZERO
}

/// All values of a header joined with commas, honoring repeated headers
fn joined_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}
