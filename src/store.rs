//! Shared translation state: cache, pending requests and the language epoch.
//!
//! One store is shared (via `Arc`) by every coalescer that observes the same
//! language selector, so independently rendered components asking for the
//! same text end up on the same request. Tests build one store per case.
//!
//! Lock order is always `state` then `cache`. Every cache write and every
//! pending-map mutation happens with `state` held, so a reader never sees a
//! half-applied batch and the check-then-register step of a lookup is atomic.
//!
//! Only `observe_target` moves the language epoch. Callers feed it values read
//! from the selector's watch channel; a lookup carrying an older target can
//! miss the cache but never invalidates it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::cache::{CacheKey, TranslationCache};
use crate::config::CacheConfig;
use crate::i18n::{Locale, TranslationMetrics};

/// A translation that other callers can await while it is in flight
pub type SharedTranslation = Shared<oneshot::Receiver<String>>;

/// Outcome of `TranslationStore::begin`
pub enum Lookup {
    /// Confirmed translation from the cache
    Cached(String),
    /// Someone already asked for this key; await their result
    Pending(SharedTranslation),
    /// The caller now owns the request and must enqueue it
    Registered {
        ticket: u64,
        resolver: oneshot::Sender<String>,
        translation: SharedTranslation,
    },
    /// The store has been disposed
    Disposed,
}

struct PendingRequest {
    ticket: u64,
    translation: SharedTranslation,
}

struct StoreState {
    pending: HashMap<CacheKey, PendingRequest>,
    /// Last observed target language
    target: Option<Locale>,
    /// Advances on every invalidation; results from older generations are not cached
    generation: u64,
    disposed: bool,
}

pub struct TranslationStore {
    cache: TranslationCache,
    state: Mutex<StoreState>,
    metrics: TranslationMetrics,
    next_ticket: AtomicU64,
}

impl TranslationStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: TranslationCache::new(config),
            state: Mutex::new(StoreState {
                pending: HashMap::new(),
                target: None,
                generation: 0,
                disposed: false,
            }),
            metrics: TranslationMetrics::new(),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn metrics(&self) -> &TranslationMetrics {
        &self.metrics
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Record `target` as the current language, invalidating everything if it changed.
    /// Returns the generation that is current afterwards.
    ///
    /// `target` must come straight from the language selector.
    pub fn observe_target(&self, target: &Locale) -> u64 {
        let mut state = self.state.lock();
        self.sync_target(&mut state, target);
        state.generation
    }

    /// Cached translation for `key`, without registering anything
    pub fn cached(&self, key: &CacheKey) -> Option<String> {
        let mut state = self.state.lock();
        state.target.get_or_insert_with(|| key.target.clone());
        if state.disposed {
            return None;
        }
        self.cache.get(key)
    }

    /// Resolve `key` from the cache, join its in-flight request, or register a
    /// new one. Runs as a single critical section.
    ///
    /// Returns the generation the lookup happened in alongside the outcome.
    pub fn begin(&self, key: &CacheKey) -> (u64, Lookup) {
        let mut state = self.state.lock();
        state.target.get_or_insert_with(|| key.target.clone());
        let generation = state.generation;

        if state.disposed {
            return (generation, Lookup::Disposed);
        }

        if let Some(translation) = self.cache.get(key) {
            self.metrics.record_cache_hit();
            return (generation, Lookup::Cached(translation));
        }
        self.metrics.record_cache_miss();

        if let Some(pending) = state.pending.get(key) {
            self.metrics.record_dedup_join();
            return (generation, Lookup::Pending(pending.translation.clone()));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (resolver, rx) = oneshot::channel();
        let translation = rx.shared();
        state.pending.insert(
            key.clone(),
            PendingRequest {
                ticket,
                translation: translation.clone(),
            },
        );

        (
            generation,
            Lookup::Registered {
                ticket,
                resolver,
                translation,
            },
        )
    }

    /// Store a confirmed translation obtained during `generation`.
    ///
    /// Returns false (and stores nothing) if the store was invalidated since,
    /// or if `key` targets a language other than the current one.
    pub fn store_translation(&self, key: CacheKey, translation: String, generation: u64) -> bool {
        let state = self.state.lock();
        let wrong_target = state
            .target
            .as_ref()
            .is_some_and(|target| *target != key.target);
        if state.disposed || state.generation != generation || wrong_target {
            self.metrics.record_stale_discard();
            debug!(
                "Discarding translation from generation {} (current {})",
                generation, state.generation
            );
            return false;
        }
        self.cache.insert(key, translation);
        true
    }

    /// Drop the pending request registered under `ticket`, if it is still there
    pub fn release_pending(&self, key: &CacheKey, ticket: u64) {
        let mut state = self.state.lock();
        if state
            .pending
            .get(key)
            .is_some_and(|pending| pending.ticket == ticket)
        {
            state.pending.remove(key);
        }
    }

    /// Wipe cache and pending requests
    pub fn clear(&self) {
        let mut state = self.state.lock();
        self.invalidate(&mut state);
        info!("Translation cache cleared");
    }

    /// Clear everything and refuse further registrations
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        self.invalidate(&mut state);
        state.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn sync_target(&self, state: &mut StoreState, target: &Locale) {
        match &state.target {
            Some(current) if current == target => {}
            Some(current) => {
                info!(
                    "Target language changed from {} to {}, invalidating translations",
                    current, target
                );
                self.invalidate(state);
                state.target = Some(target.clone());
            }
            None => state.target = Some(target.clone()),
        }
    }

    fn invalidate(&self, state: &mut StoreState) {
        state.pending.clear();
        state.generation += 1;
        self.cache.clear();
        self.metrics.record_invalidation();
    }
}
