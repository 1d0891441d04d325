//! Result Cache
//!
//! Memoizes kernel operations. The key is a blake3 digest of the operation
//! name, the sorted input identity strings and the sorted parameter pairs.
//! Geometry never enters the key: two calls on geometrically identical
//! inputs with different identities never share an entry.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::NamingConfig;
use crate::shape_id::{FeatureId, ShapeId};

/// A cached operation result
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub result: T,
    /// Sorted input identity strings
    pub inputs: Vec<String>,
    pub feature_id: FeatureId,
    pub timestamp: Instant,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}

#[derive(Debug)]
struct CacheInner<T> {
    entries: LruCache<String, CacheEntry<T>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
}

/// Identity-keyed LRU cache of operation results
///
/// Shared between bodies; a single lock guards the whole cache.
#[derive(Debug)]
pub struct ResultCache<T> {
    inner: Mutex<CacheInner<T>>,
    ttl: Option<Duration>,
}

impl<T: Clone> ResultCache<T> {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                expired: 0,
            }),
            ttl: None,
        }
    }

    /// Create a cache whose entries expire `ttl` after insertion
    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new(capacity)
        }
    }

    pub fn from_config(config: &NamingConfig) -> Self {
        match config.cache_ttl() {
            Some(ttl) => Self::with_ttl(config.cache_capacity, ttl),
            None => Self::new(config.cache_capacity),
        }
    }

    /// Compute the cache key of an operation
    pub fn cache_key(operation: &str, inputs: &[String], params: &[(&str, String)]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(operation.as_bytes());
        hasher.update(&[0]);
        for input in sorted_inputs(inputs) {
            hasher.update(input.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&[1]);
        let mut params: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        params.sort();
        for param in params {
            hasher.update(param.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Look up a cached result
    pub fn get(&self, operation: &str, inputs: &[String], params: &[(&str, String)]) -> Option<T> {
        let key = Self::cache_key(operation, inputs, params);
        let mut inner = self.inner.lock();

        let expired = inner
            .entries
            .peek(&key)
            .map(|entry| self.ttl.is_some_and(|ttl| entry.timestamp.elapsed() > ttl));
        match expired {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(true) => {
                inner.entries.pop(&key);
                inner.expired += 1;
                inner.misses += 1;
                return None;
            }
            Some(false) => {}
        }

        let result = inner.entries.get_mut(&key).map(|entry| {
            entry.hit_count += 1;
            entry.result.clone()
        });
        inner.hits += 1;
        result
    }

    /// Store a result, evicting the least recently used entry at capacity
    pub fn put(
        &self,
        operation: &str,
        inputs: &[String],
        result: T,
        feature_id: &FeatureId,
        params: &[(&str, String)],
    ) {
        let key = Self::cache_key(operation, inputs, params);
        let entry = CacheEntry {
            result,
            inputs: sorted_inputs(inputs),
            feature_id: feature_id.clone(),
            timestamp: Instant::now(),
            hit_count: 0,
        };
        let mut inner = self.inner.lock();
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry)
            && evicted != key
        {
            inner.evictions += 1;
        }
    }

    /// Drop every entry produced by `feature_id`
    pub fn invalidate_by_feature(&self, feature_id: &FeatureId) -> usize {
        self.invalidate_where(|entry| &entry.feature_id == feature_id)
    }

    /// Drop every entry that used `id` as an input
    pub fn invalidate_by_shape_id(&self, id: &ShapeId) -> usize {
        let input = id.cache_input();
        self.invalidate_where(|entry| entry.inputs.contains(&input))
    }

    fn invalidate_where(&self, predicate: impl Fn(&CacheEntry<T>) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|&(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            inner.entries.pop(key);
        }
        keys.len()
    }

    /// Features owning at least one entry
    pub fn feature_ids(&self) -> BTreeSet<FeatureId> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(_, entry)| entry.feature_id.clone())
            .collect()
    }

    /// Number of entries owned by `feature_id`
    pub fn count_for_feature(&self, feature_id: &FeatureId) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| &entry.feature_id == feature_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Visit every cached result, expired ones included
    pub fn for_each_result(&self, mut f: impl FnMut(&T)) {
        let inner = self.inner.lock();
        for (_, entry) in inner.entries.iter() {
            f(&entry.result);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expired: inner.expired,
        }
    }
}

fn sorted_inputs(inputs: &[String]) -> Vec<String> {
    let set: BTreeSet<&String> = inputs.iter().collect();
    set.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape_id::ShapeKind;
    use std::thread;

    fn params(radius: f32) -> Vec<(&'static str, String)> {
        vec![("radius", format!("{:?}", radius))]
    }

    #[test]
    fn test_hit_after_put() {
        let cache: ResultCache<u32> = ResultCache::new(8);
        let inputs = vec!["shape:a".to_string(), "solid:s".to_string()];
        assert_eq!(cache.get("Fillet", &inputs, &params(1.0)), None);

        cache.put("Fillet", &inputs, 7, &FeatureId::from("F1"), &params(1.0));
        // input order does not matter
        let reversed: Vec<String> = inputs.iter().rev().cloned().collect();
        assert_eq!(cache.get("Fillet", &reversed, &params(1.0)), Some(7));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        approx::assert_relative_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_identity_sensitivity() {
        let cache: ResultCache<u32> = ResultCache::new(8);
        let a = ShapeId::new(ShapeKind::Edge, FeatureId::from("Box"), 0, "same");
        let b = ShapeId::new(ShapeKind::Edge, FeatureId::from("Box"), 0, "same");
        cache.put("Fillet", &[a.cache_input()], 1, &FeatureId::from("F1"), &params(1.0));

        // identical geometry, different identity
        assert_eq!(cache.get("Fillet", &[b.cache_input()], &params(1.0)), None);
        assert_eq!(cache.get("Chamfer", &[a.cache_input()], &params(1.0)), None);
        assert_eq!(cache.get("Fillet", &[a.cache_input()], &params(1.5)), None);
        assert_eq!(cache.get("Fillet", &[a.cache_input()], &params(1.0)), Some(1));
    }

    #[test]
    fn test_lru_eviction() {
        let cache: ResultCache<u32> = ResultCache::new(2);
        let owner = FeatureId::from("F1");
        cache.put("A", &[], 1, &owner, &[]);
        cache.put("B", &[], 2, &owner, &[]);
        assert_eq!(cache.get("A", &[], &[]), Some(1));

        cache.put("C", &[], 3, &owner, &[]);
        assert_eq!(cache.get("B", &[], &[]), None);
        assert_eq!(cache.get("A", &[], &[]), Some(1));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: ResultCache<u32> = ResultCache::with_ttl(4, Duration::from_millis(5));
        cache.put("A", &[], 1, &FeatureId::from("F1"), &[]);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("A", &[], &[]), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expired, 1);
    }

    #[test]
    fn test_targeted_invalidation() {
        let cache: ResultCache<u32> = ResultCache::new(8);
        let id = ShapeId::new(ShapeKind::Face, FeatureId::from("Box"), 2, "f");
        cache.put("Shell", &[id.cache_input()], 1, &FeatureId::from("F1"), &[]);
        cache.put("Hollow", &[], 2, &FeatureId::from("F1"), &[]);
        cache.put("Box", &[], 3, &FeatureId::from("F0"), &[]);
        assert_eq!(cache.count_for_feature(&FeatureId::from("F1")), 2);

        assert_eq!(cache.invalidate_by_shape_id(&id), 1);
        assert_eq!(cache.invalidate_by_feature(&FeatureId::from("F1")), 1);
        assert_eq!(
            cache.feature_ids().into_iter().collect::<Vec<_>>(),
            vec![FeatureId::from("F0")]
        );
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: ResultCache<u32> = ResultCache::new(0);
        assert_eq!(cache.stats().capacity, 1);
    }
}
