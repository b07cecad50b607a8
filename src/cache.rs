//! Bounded in-memory translation cache.
//!
//! LRU eviction with a per-entry TTL. Entries are only ever written with a
//! confirmed translation; there is no placeholder state.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::i18n::Locale;

/// Cache key: (source locale, target locale, source text)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: Locale,
    pub target: Locale,
    pub text: String,
}

impl CacheKey {
    pub fn new(source: &Locale, target: &Locale, text: &str) -> Self {
        Self {
            source: source.clone(),
            target: target.clone(),
            text: text.to_string(),
        }
    }
}

struct CacheEntry {
    translation: String,
    inserted_at: Instant,
}

pub struct TranslationCache {
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl TranslationCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl: config.ttl,
        }
    }

    /// Look up a cached translation. Returns None if absent or expired.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.translation.clone());
            }
            cache.pop(key);
        }
        None
    }

    /// Insert a confirmed translation, evicting the least recently used entry when full.
    pub fn insert(&self, key: CacheKey, translation: String) {
        self.inner.lock().put(
            key,
            CacheEntry {
                translation,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
