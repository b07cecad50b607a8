//! Translation metrics and observability module.
//!
//! Provider failures are absorbed before they reach callers, so these
//! counters are the only way to see a systemic outage from the outside.
//! One instance lives inside each `TranslationStore`.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for one translation store.
#[derive(Debug, Default)]
pub struct TranslationMetrics {
    /// Lookups answered from the cache
    cache_hits: AtomicUsize,

    /// Lookups that had to go to the provider (or join a pending request)
    cache_misses: AtomicUsize,

    /// Callers that attached to an already in-flight request
    dedup_joins: AtomicUsize,

    /// Calls made to the translation provider
    api_calls: AtomicUsize,

    /// Provider calls that failed or timed out
    api_failures: AtomicUsize,

    /// Items answered with their original text
    fallbacks: AtomicUsize,

    /// Provider translations rejected by validation
    rejected: AtomicUsize,

    /// Results dropped because the language changed while they were in flight
    stale_discards: AtomicUsize,

    /// Cache wipes caused by a language change or an explicit clear
    invalidations: AtomicUsize,
}

impl TranslationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_failure(&self) {
        self.api_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallbacks(&self, count: usize) {
        self.fallbacks.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discard(&self) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> usize {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn dedup_joins(&self) -> usize {
        self.dedup_joins.load(Ordering::Relaxed)
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn api_failures(&self) -> usize {
        self.api_failures.load(Ordering::Relaxed)
    }

    pub fn fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn stale_discards(&self) -> usize {
        self.stale_discards.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let hits = self.cache_hits();
        let misses = self.cache_misses();
        let total_cache_queries = hits + misses;
        let cache_hit_rate = if total_cache_queries > 0 {
            (hits as f64 / total_cache_queries as f64) * 100.0
        } else {
            0.0
        };

        let calls = self.api_calls();
        let failures = self.api_failures();
        let api_success_rate = if calls > 0 {
            (calls.saturating_sub(failures) as f64 / calls as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate,
            dedup_joins: self.dedup_joins(),
            api_calls: calls,
            api_failures: failures,
            api_success_rate,
            fallbacks: self.fallbacks(),
            rejected: self.rejected(),
            stale_discards: self.stale_discards(),
            invalidations: self.invalidations(),
        }
    }
}

/// Snapshot of the translation counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub cache_hits: usize,
    pub cache_misses: usize,

    /// Cache hit rate as a percentage (0-100)
    pub cache_hit_rate: f64,

    pub dedup_joins: usize,
    pub api_calls: usize,
    pub api_failures: usize,

    /// Provider success rate as a percentage (0-100)
    pub api_success_rate: f64,

    pub fallbacks: usize,
    pub rejected: usize,
    pub stale_discards: usize,
    pub invalidations: usize,
}
