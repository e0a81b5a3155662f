//! Bounded LRU caches with a soft TTL, and the engine-facing [`SchemaCache`].
//!
//! Two caches back the preparation pipeline: one for prepared schemas
//! (keyed by mode + canonical serialization) and one for compiled
//! validators (keyed by canonical serialization alone). Both are strict LRU
//! with a soft TTL; reads refresh an entry's age. Data-validation *results*
//! are never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonschema::JSONSchema;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::schema::prepare::{self, Mode, cache_key, canonical_string};
use crate::schema::validate;

/// Soft TTL shared by the prepared-schema and validator caches.
pub const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Default entry bound for each cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Size/bound snapshot for one cache, read by the metrics surface.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max: usize,
}

/// Combined snapshot for both caches.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SchemaCacheStats {
    pub schema: CacheStats,
    pub validator: CacheStats,
}

struct CacheEntry<V> {
    value: V,
    last_used: Instant,
}

/// A bounded least-recently-used cache with a soft TTL.
///
/// Reads refresh the entry's age; expired entries are dropped on access and
/// pruned on insert. When the bound is reached the least-recently-used live
/// entry is evicted.
pub struct TtlLruCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> TtlLruCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.last_used.elapsed() <= self.ttl => {
                entry.last_used = Instant::now();
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: V) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.last_used.elapsed() <= self.ttl);
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                last_used: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            max: self.capacity,
        }
    }
}

/// Process-wide memoization for prepared schemas and compiled validators.
///
/// Safe for concurrent read and mutation; callers receive `Arc`'d values and
/// never hold references into the cache interior.
pub struct SchemaCache {
    prepared: TtlLruCache<Arc<Value>>,
    validators: TtlLruCache<Arc<JSONSchema>>,
}

impl SchemaCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            prepared: TtlLruCache::new(capacity, CACHE_TTL),
            validators: TtlLruCache::new(capacity, CACHE_TTL),
        }
    }

    /// Returns the prepared form of `schema` for `mode`, memoized by the
    /// canonical key of the input schema.
    pub fn prepare(&self, schema: &Value, mode: Mode) -> Arc<Value> {
        let key = cache_key(schema, mode);
        if let Some(hit) = self.prepared.get(&key) {
            return hit;
        }
        let prepared = Arc::new(prepare::prepare(schema, mode));
        self.prepared.insert(key, Arc::clone(&prepared));
        prepared
    }

    /// Returns a compiled validator for `schema`, memoized by canonical
    /// serialization. Compilation failures are not cached.
    pub fn validator(&self, schema: &Value) -> Result<Arc<JSONSchema>> {
        let key = canonical_string(schema);
        if let Some(hit) = self.validators.get(&key) {
            return Ok(hit);
        }
        let compiled = Arc::new(validate::compile(schema)?);
        self.validators.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Runs the cached compiled validator for `schema` against `record`.
    /// Returns the full error list; results are never cached.
    pub fn validate_data(&self, record: &Value, schema: &Value) -> Result<Vec<String>> {
        let validator = self.validator(schema)?;
        Ok(validate::collect_errors(&validator, record))
    }

    pub fn clear(&self) {
        self.prepared.clear();
        self.validators.clear();
    }

    pub fn stats(&self) -> SchemaCacheStats {
        SchemaCacheStats {
            schema: self.prepared.stats(),
            validator: self.validators.stats(),
        }
    }
}

impl core::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let stats = self.stats();
        f.debug_struct("SchemaCache")
            .field("schema", &stats.schema.size)
            .field("validator", &stats.validator.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_refresh_entry_age() {
        let cache: TtlLruCache<u32> = TtlLruCache::new(8, Duration::from_millis(40));
        cache.insert("k".to_string(), 1);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get("k"), Some(1));
        std::thread::sleep(Duration::from_millis(25));
        // Still alive: the read above reset the clock.
        assert_eq!(cache.get("k"), Some(1));
    }

    #[test]
    fn expired_entries_are_dropped_on_access() {
        let cache: TtlLruCache<u32> = TtlLruCache::new(8, Duration::from_millis(10));
        cache.insert("k".to_string(), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn eviction_targets_least_recently_used() {
        let cache: TtlLruCache<u32> = TtlLruCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".to_string(), 2);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn prepare_is_memoized() {
        let cache = SchemaCache::new(8);
        let schema = json!({ "type": "object", "properties": { "a": { "type": "string" } } });
        let first = cache.prepare(&schema, Mode::Strict);
        let second = cache.prepare(&schema, Mode::Strict);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().schema.size, 1);
    }

    #[test]
    fn modes_occupy_distinct_slots() {
        let cache = SchemaCache::new(8);
        let schema = json!({ "type": "object", "properties": { "a": { "type": "string" } } });
        cache.prepare(&schema, Mode::Strict);
        cache.prepare(&schema, Mode::Fuzz);
        assert_eq!(cache.stats().schema.size, 2);
    }

    #[test]
    fn clear_empties_both_caches() {
        let cache = SchemaCache::new(8);
        let schema = json!({ "type": "object" });
        cache.prepare(&schema, Mode::Strict);
        let record = json!({});
        cache
            .validate_data(&record, &schema)
            .expect("schema compiles");
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.schema.size, 0);
        assert_eq!(stats.validator.size, 0);
    }
}
