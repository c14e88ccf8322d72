//! Result Cache (C4): write-through TTL + byte-budget LRU keyed by
//! (query, options-fingerprint).

use crate::clock::Clock;
use crate::search::engine::SearchMatch;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct CacheEntry {
    results: Vec<SearchMatch>,
    size_bytes: u64,
    inserted_at: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: u64,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Most-recently-used key at the back.
    order: Vec<String>,
    bytes: u64,
    stats: CacheStats,
}

/// A rough per-entry size estimate; real byte accounting would require
/// knowing the serialized wire size, which this crate's callers don't need.
fn estimate_size(results: &[SearchMatch]) -> u64 {
    results
        .iter()
        .map(|r| (r.path.len() + r.preview.as_deref().map_or(0, str::len) + 64) as u64)
        .sum()
}

/// Keyed (query, options-fingerprint) write-through cache with two
/// independent eviction caps plus TTL.
pub struct ResultCache {
    clock: Arc<dyn Clock>,
    max_entries: usize,
    max_bytes: u64,
    ttl_ms: u64,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize, max_bytes: u64, ttl_ms: u64) -> Self {
        Self {
            clock,
            max_entries,
            max_bytes,
            ttl_ms,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                bytes: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    fn touch(inner: &mut Inner, key: &str) {
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            let k = inner.order.remove(pos);
            inner.order.push(k);
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<SearchMatch>> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();

        let fresh = inner
            .entries
            .get(key)
            .is_some_and(|entry| now.saturating_sub(entry.inserted_at) <= self.ttl_ms);

        if !fresh {
            if let Some(entry) = inner.entries.remove(key) {
                inner.bytes = inner.bytes.saturating_sub(entry.size_bytes);
                inner.order.retain(|k| k != key);
            }
            inner.stats.misses += 1;
            return None;
        }

        Self::touch(&mut inner, key);
        inner.stats.hits += 1;
        inner.entries.get(key).map(|e| e.results.clone())
    }

    pub fn put(&self, key: String, results: Vec<SearchMatch>) {
        let size_bytes = estimate_size(&results);
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();

        if let Some(old) = inner.entries.remove(&key) {
            inner.bytes = inner.bytes.saturating_sub(old.size_bytes);
            inner.order.retain(|k| k != &key);
        }

        inner.bytes += size_bytes;
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                results,
                size_bytes,
                inserted_at: now,
            },
        );
        inner.order.push(key);

        while inner.entries.len() > self.max_entries || inner.bytes > self.max_bytes {
            let Some(lru_key) = (!inner.order.is_empty()).then(|| inner.order.remove(0)) else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&lru_key) {
                inner.bytes = inner.bytes.saturating_sub(evicted.size_bytes);
            }
        }
        inner.stats.entries = inner.entries.len();
        inner.stats.bytes = inner.bytes;
    }

    /// Removes entries whose key starts with `prefix`; `None` clears the
    /// whole cache.
    pub fn clear(&self, prefix: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        match prefix {
            None => {
                inner.entries.clear();
                inner.order.clear();
                inner.bytes = 0;
            }
            Some(prefix) => {
                let stale: Vec<String> = inner
                    .entries
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect();
                for key in stale {
                    if let Some(entry) = inner.entries.remove(&key) {
                        inner.bytes = inner.bytes.saturating_sub(entry.size_bytes);
                    }
                    inner.order.retain(|k| k != &key);
                }
            }
        }
        inner.stats.entries = inner.entries.len();
        inner.stats.bytes = inner.bytes;
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::search::engine::{FileMetadata, MatchKind};
    use std::collections::HashMap;

    fn sample(path: &str) -> SearchMatch {
        SearchMatch {
            path: path.into(),
            score: 1.0,
            match_type: MatchKind::Exact,
            line_numbers: Vec::new(),
            preview: None,
            relevance_factors: HashMap::new(),
            metadata: FileMetadata::default(),
        }
    }

    #[test]
    fn hit_then_expires_after_ttl() {
        let clock = FakeClock::new();
        let cache = ResultCache::new(clock.clone(), 10, 1_000_000, 100);
        cache.put("q1".into(), vec![sample("a.rs")]);
        assert!(cache.get("q1").is_some());

        clock.advance(150);
        assert!(cache.get("q1").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn evicts_lru_once_entry_cap_exceeded() {
        let clock = FakeClock::new();
        let cache = ResultCache::new(clock, 2, 1_000_000, 60_000);
        cache.put("a".into(), vec![sample("a.rs")]);
        cache.put("b".into(), vec![sample("b.rs")]);
        cache.get("a");
        cache.put("c".into(), vec![sample("c.rs")]);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn evicts_once_byte_budget_exceeded() {
        let clock = FakeClock::new();
        let many_results: Vec<SearchMatch> = (0..100).map(|i| sample(&format!("file-{i}.rs"))).collect();
        let cache = ResultCache::new(clock, 1000, 200, 60_000);
        cache.put("big".into(), many_results);
        cache.put("small".into(), vec![sample("x.rs")]);

        assert!(cache.get("big").is_none());
        assert!(cache.get("small").is_some());
    }

    #[test]
    fn clear_by_prefix_leaves_other_keys() {
        let clock = FakeClock::new();
        let cache = ResultCache::new(clock, 10, 1_000_000, 60_000);
        cache.put("search:foo".into(), vec![sample("a.rs")]);
        cache.put("search:bar".into(), vec![sample("b.rs")]);
        cache.put("other:baz".into(), vec![sample("c.rs")]);

        cache.clear(Some("search:"));
        assert!(cache.get("search:foo").is_none());
        assert!(cache.get("search:bar").is_none());
        assert!(cache.get("other:baz").is_some());
    }
}
