//! Offline response cache with moka
//!
//! Stores the last successful GET response per URL so that, under the
//! `Offline` cache policy, a request that fails with a network error can
//! be answered from memory instead.
//!
//! # Behavior
//!
//! - **What is cached**: 2xx responses to GET requests, keyed by full URL
//!   (query string included)
//! - **What is not**: errors, non-GET methods and non-2xx responses
//! - **TTL / capacity**: from [`OfflineCacheConfig`]

use std::collections::BTreeMap;
use std::sync::Arc;

use moka::sync::Cache;
use url::Url;

use crate::config::OfflineCacheConfig;
use crate::request::HttpMethod;
use crate::response::ResponseBody;

/// A cached successful response
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<ResponseBody>,
}

/// In-memory cache of GET responses used for offline fallback
#[derive(Clone)]
pub struct OfflineCache {
    entries: Cache<String, Arc<CachedResponse>>,
}

impl std::fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineCache").field("entries", &self.entries.entry_count()).finish()
    }
}

impl OfflineCache {
    pub fn new(config: &OfflineCacheConfig) -> Self {
        config.log_config();
        let entries =
            Cache::builder().time_to_live(config.ttl).max_capacity(config.max_capacity).build();
        Self { entries }
    }

    /// Cache key for a request, `None` for methods that are never cached
    #[must_use]
    pub fn key(method: HttpMethod, url: &Url) -> Option<String> {
        (method == HttpMethod::Get).then(|| url.as_str().to_string())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        let hit = self.entries.get(key);
        if hit.is_some() {
            tracing::debug!(key, "Offline cache hit");
        } else {
            tracing::debug!(key, "Offline cache miss");
        }
        hit
    }

    /// Store a response; non-2xx statuses are ignored
    pub fn insert(&self, key: String, response: CachedResponse) {
        if !(200..300).contains(&response.status) {
            return;
        }
        tracing::trace!(key = %key, status = response.status, "Response cached");
        self.entries.insert(key, Arc::new(response));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.invalidate(key);
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        self.entries.invalidate_all();
        tracing::info!("Offline cache cleared");
    }

    /// Number of entries, after applying pending evictions
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn cache_with_ttl(ttl: Duration) -> OfflineCache {
        OfflineCache::new(&OfflineCacheConfig { ttl, max_capacity: 10 })
    }

    fn ok(body: serde_json::Value) -> CachedResponse {
        CachedResponse { status: 200, headers: BTreeMap::new(), body: Some(ResponseBody::Json(body)) }
    }

    #[test]
    fn test_only_get_requests_have_keys() {
        let url = Url::parse("https://api.example.com/items/5?x=1").unwrap();
        assert_eq!(
            OfflineCache::key(HttpMethod::Get, &url).as_deref(),
            Some("https://api.example.com/items/5?x=1")
        );
        assert!(OfflineCache::key(HttpMethod::Post, &url).is_none());
        assert!(OfflineCache::key(HttpMethod::Delete, &url).is_none());
    }

    #[test]
    fn test_cache_hit_and_overwrite() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        cache.insert("k".into(), ok(json!({"v": 1})));
        cache.insert("k".into(), ok(json!({"v": 2})));

        let hit = cache.get("k").expect("cached");
        assert_eq!(hit.body, Some(ResponseBody::Json(json!({"v": 2}))));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_non_success_not_cached() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        let mut response = ok(json!({}));
        response.status = 500;
        cache.insert("k".into(), response);

        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_ttl_expiration() {
        let cache = cache_with_ttl(Duration::from_millis(50));
        cache.insert("k".into(), ok(json!({})));
        assert!(cache.get("k").is_some());

        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        cache.insert("a".into(), ok(json!({})));
        cache.insert("b".into(), ok(json!({})));

        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.clear();
        assert_eq!(cache.entry_count(), 0);
    }
}
