//! Response cache
//!
//! Serialized query responses keyed by endpoint and parameters, with a
//! fixed TTL checked at read time. Entries are dropped wholesale by
//! substring when a dataset refreshes, so every dataset-scoped key carries
//! the dataset key verbatim.

use crate::datasets::DatasetKey;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Deterministic cache key: `endpoint?name=value&...` with names sorted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn builder(endpoint: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            endpoint: endpoint.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    endpoint: String,
    params: BTreeMap<&'static str, String>,
}

impl CacheKeyBuilder {
    pub fn dataset(self, key: &DatasetKey) -> Self {
        self.param("dataset", key.as_str())
    }

    pub fn param(mut self, name: &'static str, value: impl ToString) -> Self {
        self.params.insert(name, value.to_string());
        self
    }

    pub fn param_opt<T: ToString>(self, name: &'static str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    pub fn build(self) -> CacheKey {
        if self.params.is_empty() {
            return CacheKey(self.endpoint);
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        CacheKey(format!("{}?{}", self.endpoint, query.join("&")))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

/// Counters exposed through the health report
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    /// Lookup as of `now`; an expired entry is removed and reported absent
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<Value> {
        let expired = match self.entries.get(key.as_str()) {
            Some(entry) if self.is_fresh(&entry, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(key.as_str(), |_, entry| !self.is_fresh(entry, now));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: CacheKey, value: Value) {
        self.put_at(key, value, Instant::now());
    }

    pub fn put_at(&self, key: CacheKey, value: Value, inserted_at: Instant) {
        self.entries.insert(key.0, CacheEntry { value, inserted_at });
    }

    /// Remove every entry whose key contains `needle`; returns how many went
    pub fn invalidate_containing(&self, needle: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !key.contains(needle);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            tracing::debug!("Invalidated {} cache entries matching {:?}", removed, needle);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) < self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(k: &str) -> DatasetKey {
        DatasetKey::new(k).unwrap()
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = CacheKey::builder("sector_series")
            .dataset(&key("sp500"))
            .param("sector", "Energy")
            .build();
        let b = CacheKey::builder("sector_series")
            .param("sector", "Energy")
            .dataset(&key("sp500"))
            .build();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "sector_series?dataset=sp500&sector=Energy");

        let bare = CacheKey::builder("latest_all").param_opt::<String>("x", None).build();
        assert_eq!(bare.as_str(), "latest_all");
    }

    #[test]
    fn test_ttl_boundary() {
        let ttl = Duration::from_secs(1800);
        let cache = ResponseCache::new(ttl);
        let k = CacheKey::builder("prices").dataset(&key("idxa")).build();
        let t0 = Instant::now();

        cache.put_at(k.clone(), json!([1, 2, 3]), t0);

        assert_eq!(cache.get_at(&k, t0), Some(json!([1, 2, 3])));
        assert!(cache.get_at(&k, t0 + ttl - Duration::from_millis(1)).is_some());
        assert!(cache.get_at(&k, t0 + ttl).is_none());

        // Expired entry was removed on read
        assert!(cache.is_empty());
        assert!(cache.get_at(&k, t0).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_invalidation_is_complete() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let idxa = key("idxa");
        let idxb = key("idxb");

        for endpoint in ["prices", "latest", "sector_series", "industry_series", "stock_returns"] {
            cache.put(CacheKey::builder(endpoint).dataset(&idxa).build(), json!(1));
            cache.put(CacheKey::builder(endpoint).dataset(&idxb).build(), json!(2));
        }
        cache.put(
            CacheKey::builder("sector_returns")
                .dataset(&idxa)
                .param("period", "1y")
                .build(),
            json!(3),
        );

        assert_eq!(cache.invalidate_containing("idxa"), 6);
        assert_eq!(cache.len(), 5);
        assert!(cache
            .get(&CacheKey::builder("prices").dataset(&idxb).build())
            .is_some());
        assert!(cache
            .get(&CacheKey::builder("prices").dataset(&idxa).build())
            .is_none());

        assert_eq!(cache.invalidate_containing("idxa"), 0);
        cache.clear();
        assert!(cache.is_empty());
    }
}
