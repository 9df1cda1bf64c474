//! Concurrent cache store with variant-aware keys and background purging.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use hyper::header::VARY;
use hyper::{HeaderMap, Method};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{policy, strip_hop_by_hop, CacheEntry};
use crate::config::CacheConfig;

/// One cached resource: the `Vary` header names of the stored response and
/// the entries keyed by the request values of those headers. A resource
/// with an empty vary list holds a single variant under the empty key.
#[derive(Debug, Default)]
struct Resource {
    vary: Vec<String>,
    variants: HashMap<String, CacheEntry>,
}

type Store = Arc<RwLock<HashMap<String, Resource>>>;

/// In-memory response cache.
///
/// Reads share a lock, writes exclude. Expired entries are removed lazily
/// on read and wholesale by a background sweep every `purge_interval`.
pub struct ResponseCache {
    store: Store,
    default_ttl: Duration,
    max_age: Duration,
    purge_task: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseCache {
    /// Create a cache and start its background purge task
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            default_ttl: config.get_default_ttl(),
            max_age: config.get_max_age(),
            purge_task: Mutex::new(None),
        };
        cache.start_purge_task(config.get_purge_interval());
        cache
    }

    fn start_purge_task(&self, every: Duration) {
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            // the first tick completes immediately; skip it
            tick.tick().await;
            loop {
                tick.tick().await;
                purge_expired(&store).await;
            }
        });
        if let Ok(mut guard) = self.purge_task.lock() {
            *guard = Some(handle);
        }
    }

    /// Stop the background purge task. Idempotent.
    pub fn stop(&self) {
        if let Ok(guard) = self.purge_task.lock() {
            if let Some(handle) = guard.as_ref() {
                handle.abort();
            }
        }
    }

    /// Base resource key: `METHOD|HOST|PATH?QUERY`
    pub fn resource_key(method: &Method, host: &str, path_and_query: &str) -> String {
        format!("{}|{}|{}", method, host, path_and_query)
    }

    /// Look up the entry for this resource and request. Expired entries are
    /// removed and reported as misses.
    pub async fn get(&self, resource_key: &str, request_headers: &HeaderMap) -> Option<CacheEntry> {
        let now = Instant::now();
        let variant;
        {
            let store = self.store.read().await;
            let resource = store.get(resource_key)?;
            variant = variant_key(&resource.vary, request_headers);
            match resource.variants.get(&variant) {
                None => return None,
                Some(entry) if !entry.expired_at(now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        // The entry was expired: re-check under the write lock and delete it.
        let mut store = self.store.write().await;
        if let Some(resource) = store.get_mut(resource_key) {
            if resource
                .variants
                .get(&variant)
                .is_some_and(|entry| entry.expired_at(now))
            {
                resource.variants.remove(&variant);
                if resource.variants.is_empty() {
                    store.remove(resource_key);
                }
                debug!(key = resource_key, "evicted expired cache entry");
            }
        }
        None
    }

    /// Store a response. Only called after the admission predicate holds.
    /// The variant is derived from the response `Vary` header and the
    /// request's values for the named headers; an existing entry at the
    /// same key is overwritten.
    pub async fn insert(
        &self,
        resource_key: String,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
        body: Bytes,
    ) {
        let ttl = policy::determine_ttl(response_headers, self.default_ttl, self.max_age);
        if ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + ttl;

        let vary = vary_names(response_headers);
        let variant = variant_key(&vary, request_headers);
        let entry = CacheEntry::new(body, strip_hop_by_hop(response_headers), expires_at);

        let mut store = self.store.write().await;
        let resource = store.entry(resource_key).or_default();
        resource.vary = vary;
        resource.variants.insert(variant, entry);
    }

    /// Number of live variants, for observability and tests
    pub async fn entry_count(&self) -> usize {
        let store = self.store.read().await;
        store.values().map(|r| r.variants.len()).sum()
    }

    #[cfg(test)]
    async fn insert_raw(&self, resource_key: &str, vary: Vec<String>, variant: &str, entry: CacheEntry) {
        let mut store = self.store.write().await;
        let resource = store.entry(resource_key.to_string()).or_default();
        resource.vary = vary;
        resource.variants.insert(variant.to_string(), entry);
    }
}

/// Remove every expired variant and every resource left empty
async fn purge_expired(store: &RwLock<HashMap<String, Resource>>) {
    let now = Instant::now();
    let mut store = store.write().await;

    let mut removed = 0usize;
    for resource in store.values_mut() {
        let before = resource.variants.len();
        resource.variants.retain(|_, entry| !entry.expired_at(now));
        removed += before - resource.variants.len();
    }
    store.retain(|_, resource| !resource.variants.is_empty());

    if removed > 0 {
        debug!(removed, "purged expired cache entries");
    }
}

/// Header names listed in the response `Vary`, lowercased and trimmed, in
/// the order the header lists them
fn vary_names(response_headers: &HeaderMap) -> Vec<String> {
    let mut names = Vec::new();
    for value in response_headers.get_all(VARY) {
        if let Ok(list) = value.to_str() {
            for name in list.split(',') {
                let name = name.trim().to_ascii_lowercase();
                if !name.is_empty() {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// Variant suffix for a request: `|vary:` followed by the request's values
/// for each vary header, joined with commas. Empty when the resource does
/// not vary.
fn variant_key(vary: &[String], request_headers: &HeaderMap) -> String {
    if vary.is_empty() {
        return String::new();
    }
    let values: Vec<String> = vary
        .iter()
        .map(|name| {
            request_headers
                .get_all(name.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();
    format!("|vary:{}", values.join(","))
}
