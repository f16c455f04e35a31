//! Export cache.
//!
//! Exports are read far more often than translations change, so the export
//! engine keeps per-language snapshots behind the [`ExportCache`] trait. The
//! cache is injected wherever it is needed; tests swap in [`NoopCache`].

use serde::Serialize;
use serde_json::{Map, Value};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::db::Language;
use crate::tags::TagWithCount;

/// One exported `key`/`value` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// A cached export snapshot, or one of the catalogue listings
#[derive(Debug, Clone, PartialEq)]
pub enum CachedExport {
    Flat(Arc<Vec<KeyValue>>),
    Nested(Arc<Map<String, Value>>),
    Languages(Arc<Vec<Language>>),
    Tags(Arc<Vec<TagWithCount>>),
}

/// Counters reported by a cache implementation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub invalidations: usize,
    pub entries: usize,
    pub hit_rate: f64,
}

pub trait ExportCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedExport>;

    fn set(&self, key: &str, value: CachedExport);

    fn invalidate(&self, key: &str);

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Cache key of a language's flat export (shared by single and multi export)
pub fn flat_key(language_code: &str) -> String {
    format!("translations.export.{}", language_code)
}

/// Cache key of the language listing
pub const LANGUAGES_KEY: &str = "languages";

/// Cache key of the tag listing with translation counts
pub const TAGS_KEY: &str = "tags.all";

/// Cache key of a language's nested export
pub fn nested_key(language_code: &str) -> String {
    format!("translations.export.{}.nested", language_code)
}

struct Entry {
    value: CachedExport,
    stored_at: Instant,
}

impl Entry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() >= ttl
    }
}

/// Snapshots kept per language (flat + nested) before the least recently
/// used one is dropped
pub const DEFAULT_CAPACITY: usize = 256;

/// In-memory LRU cache whose entries expire `ttl` after they were stored
pub struct TtlCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    hits: AtomicUsize,
    misses: AtomicUsize,
    invalidations: AtomicUsize,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ExportCache for TtlCache {
    fn get(&self, key: &str) -> Option<CachedExport> {
        let mut entries = self.entries();

        let found = match entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(entry.value.clone()),
            Some(_) => {
                // Expired: drop it so dead snapshots do not hold a slot
                entries.pop(key);
                None
            }
            None => None,
        };

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Export cache miss");
                None
            }
        }
    }

    fn set(&self, key: &str, value: CachedExport) {
        self.entries().put(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, key: &str) {
        if self.entries().pop(key).is_some() {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.entries().len(),
            hit_rate,
        }
    }
}

/// Cache that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl ExportCache for NoopCache {
    fn get(&self, _key: &str) -> Option<CachedExport> {
        None
    }

    fn set(&self, _key: &str, _value: CachedExport) {}

    fn invalidate(&self, _key: &str) {}
}
