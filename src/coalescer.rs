//! Translation coalescer: batches, de-duplicates and caches translate calls.
//!
//! Each coalescer owns a batch worker task. `translate` registers its text in
//! the shared store and hands the item to the worker, which waits for a quiet
//! period (debounce) or a hard deadline and then sends every queued item to
//! the provider in one call. Callers never see an error: any failure resolves
//! to the original text.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::config::CoalescerConfig;
use crate::i18n::{Locale, TranslationValidator};
use crate::provider::{BatchItem, BatchRequest, BatchResponse, ProviderError, TranslationProvider};
use crate::store::{Lookup, TranslationStore};

/// Per-position state while assembling a `translate_batch` answer
enum Slot {
    Ready(String),
    /// Index into the de-duplicated list sent to the provider
    Missing(usize),
}

/// An item waiting for the next batch
struct QueuedItem {
    key: String,
    text: String,
    pending_key: CacheKey,
    ticket: u64,
    resolver: oneshot::Sender<String>,
}

enum Command {
    Enqueue(QueuedItem),
    Flush,
}

/// State shared by the coalescer handle, its worker, and in-flight batches
struct Inner {
    store: Arc<TranslationStore>,
    provider: Arc<dyn TranslationProvider>,
    language: watch::Receiver<Locale>,
    config: CoalescerConfig,
}

impl Inner {
    fn current_target(&self) -> Locale {
        self.language.borrow().clone()
    }

    /// Identity cases that never touch the cache or the provider
    fn passes_through(&self, text: &str, target: &Locale) -> bool {
        !self.config.enabled || text.trim().is_empty() || *target == self.config.source_locale
    }

    async fn call_provider(&self, request: &BatchRequest) -> Result<BatchResponse, ProviderError> {
        self.store.metrics().record_api_call();
        let limit = self.config.provider_timeout;
        let result = match timeout(limit, self.provider.translate_batch(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(limit)),
        };
        if let Err(e) = &result {
            self.store.metrics().record_api_failure();
            warn!(
                "Translation batch of {} items to {} failed, serving original text: {}",
                request.items.len(),
                request.target_locale,
                e
            );
        }
        result
    }

    /// Validation gate between the provider and the cache
    fn accept(&self, original: &str, translated: &str) -> bool {
        let report = TranslationValidator::validate(original, translated);
        if report.has_errors() {
            self.store.metrics().record_rejected();
            warn!("Rejected translation of {:?}: {:?}", original, report.errors);
            return false;
        }
        if report.has_warnings() {
            debug!("Translation warnings for {:?}: {:?}", original, report.warnings);
        }
        true
    }

    /// Send one drained batch to the provider and resolve every caller in it.
    ///
    /// `target` and `generation` are the language epoch observed at flush time.
    async fn dispatch(self: Arc<Self>, batch: Vec<QueuedItem>, target: Locale, generation: u64) {
        let source = self.config.source_locale.clone();

        if !self.config.enabled || target == source {
            self.resolve_with_originals(batch);
            return;
        }

        let request = BatchRequest {
            items: batch
                .iter()
                .map(|item| BatchItem {
                    key: item.key.clone(),
                    text: item.text.clone(),
                })
                .collect(),
            source_locale: source.clone(),
            target_locale: target.clone(),
        };

        debug!("Flushing batch of {} items to {}", batch.len(), target);

        let mut translations: HashMap<String, String> = match self.call_provider(&request).await {
            Ok(response) => response
                .results
                .into_iter()
                .map(|result| (result.key, result.translation))
                .collect(),
            Err(_) => {
                self.resolve_with_originals(batch);
                return;
            }
        };

        let mut fallbacks = 0;
        for item in batch {
            let answer = match translations.remove(&item.key) {
                Some(translation) if self.accept(&item.text, &translation) => {
                    self.store.store_translation(
                        CacheKey::new(&source, &target, &item.text),
                        translation.clone(),
                        generation,
                    );
                    // Queued under another language: cached for later, but not this caller's answer
                    if item.pending_key.target == target {
                        Some(translation)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            let answer = answer.unwrap_or_else(|| {
                fallbacks += 1;
                item.text.clone()
            });
            self.store.release_pending(&item.pending_key, item.ticket);
            let _ = item.resolver.send(answer);
        }
        self.store.metrics().record_fallbacks(fallbacks);
    }

    fn resolve_with_originals(&self, batch: Vec<QueuedItem>) {
        self.store.metrics().record_fallbacks(batch.len());
        for item in batch {
            self.store.release_pending(&item.pending_key, item.ticket);
            let _ = item.resolver.send(item.text);
        }
    }
}

/// Owns the batch queue and the batch timer of one coalescer
struct BatchWorker {
    inner: Arc<Inner>,
    /// The only reader that moves the store's language epoch
    language: watch::Receiver<Locale>,
    queue: Vec<QueuedItem>,
    queued_keys: HashSet<String>,
    first_arrival: Option<Instant>,
    last_arrival: Option<Instant>,
}

impl BatchWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, shutdown: CancellationToken) {
        let mut watching = true;
        self.observe_language();

        loop {
            let deadline = self.deadline();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                changed = self.language.changed(), if watching => match changed {
                    Ok(()) => {
                        self.observe_language();
                    }
                    // Selector gone: the language can no longer change
                    Err(_) => watching = false,
                },
                command = commands.recv() => match command {
                    Some(Command::Enqueue(item)) => self.push(item),
                    Some(Command::Flush) => self.flush(),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush()
                }
            }
        }

        // Teardown: the armed timer dies with this task; queued callers get their text back
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Enqueue(item) = command {
                self.queue.push(item);
            }
        }
        if !self.queue.is_empty() {
            debug!(
                "Batch worker stopped with {} queued items, returning originals",
                self.queue.len()
            );
            let batch = std::mem::take(&mut self.queue);
            self.inner.resolve_with_originals(batch);
        }
    }

    /// When the armed timer fires: the debounce window after the latest
    /// arrival, capped by the max-wait deadline after the first one
    fn deadline(&self) -> Option<Instant> {
        let first = self.first_arrival?;
        let last = self.last_arrival.unwrap_or(first);
        Some((last + self.inner.config.debounce).min(first + self.inner.config.max_wait))
    }

    /// Record the selector's latest value in the store
    fn observe_language(&mut self) -> (Locale, u64) {
        let target = self.language.borrow_and_update().clone();
        let generation = self.inner.store.observe_target(&target);
        (target, generation)
    }

    fn push(&mut self, mut item: QueuedItem) {
        if !self.queued_keys.insert(item.key.clone()) {
            item.key = format!("{}#{}", item.key, uuid::Uuid::new_v4());
            self.queued_keys.insert(item.key.clone());
        }

        let now = Instant::now();
        self.first_arrival.get_or_insert(now);
        self.last_arrival = Some(now);
        self.queue.push(item);
    }

    /// Drain the queue atomically and dispatch it without blocking the worker
    fn flush(&mut self) {
        self.first_arrival = None;
        self.last_arrival = None;
        self.queued_keys.clear();
        if self.queue.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.queue);
        let (target, generation) = self.observe_language();
        tokio::spawn(Arc::clone(&self.inner).dispatch(batch, target, generation));
    }
}

/// Batched, de-duplicating translation front end.
///
/// Must be created inside a tokio runtime. Dropping the coalescer (or calling
/// `dispose`) stops its batch worker; an armed batch timer never fires after
/// that.
pub struct TranslationCoalescer {
    inner: Arc<Inner>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TranslationCoalescer {
    pub fn new(
        store: Arc<TranslationStore>,
        provider: Arc<dyn TranslationProvider>,
        language: watch::Receiver<Locale>,
        config: CoalescerConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            store,
            provider,
            language,
            config,
        });
        let (commands, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let worker = BatchWorker {
            language: inner.language.clone(),
            inner: Arc::clone(&inner),
            queue: Vec::new(),
            queued_keys: HashSet::new(),
            first_arrival: None,
            last_arrival: None,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown.clone()));

        Self {
            inner,
            commands,
            shutdown,
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn store(&self) -> &Arc<TranslationStore> {
        &self.inner.store
    }

    pub fn source_locale(&self) -> &Locale {
        &self.inner.config.source_locale
    }

    pub fn target_locale(&self) -> Locale {
        self.inner.current_target()
    }

    /// Translate one string.
    ///
    /// `key` is the item key sent to the provider; a unique one is generated
    /// when absent. The result is the translation, or `text` itself when
    /// translation is disabled, not needed, or failed.
    pub async fn translate(&self, text: &str, key: Option<&str>) -> String {
        let target = self.inner.current_target();
        if self.inner.passes_through(text, &target) {
            return text.to_string();
        }

        let cache_key = CacheKey::new(&self.inner.config.source_locale, &target, text);
        let translation = match self.inner.store.begin(&cache_key).1 {
            Lookup::Cached(translation) => return translation,
            Lookup::Disposed => return text.to_string(),
            Lookup::Pending(translation) => translation,
            Lookup::Registered {
                ticket,
                resolver,
                translation,
            } => {
                let item = QueuedItem {
                    key: key
                        .map(str::to_string)
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    text: text.to_string(),
                    pending_key: cache_key.clone(),
                    ticket,
                    resolver,
                };
                if self.commands.send(Command::Enqueue(item)).is_err() {
                    self.inner.store.release_pending(&cache_key, ticket);
                    return text.to_string();
                }
                translation
            }
        };

        match translation.await {
            Ok(translated) if self.inner.current_target() == target => translated,
            Ok(_) => {
                self.inner.store.metrics().record_stale_discard();
                debug!("Language changed while translating {:?}, discarding result", text);
                text.to_string()
            }
            Err(_) => text.to_string(),
        }
    }

    /// Translate many strings with one provider call, bypassing the batch timer.
    ///
    /// The output always has the same length and order as `texts`; anything
    /// that cannot be translated comes back unchanged.
    pub async fn translate_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<String> {
        let originals: Vec<String> = texts.iter().map(|t| t.as_ref().to_string()).collect();
        let source = self.inner.config.source_locale.clone();
        let target = self.inner.current_target();
        if !self.inner.config.enabled || target == source {
            return originals;
        }

        // Results are cached only if no invalidation happens before they arrive
        let generation = self.inner.store.generation();
        let mut slots: Vec<Slot> = Vec::with_capacity(originals.len());
        let mut missing: Vec<&str> = Vec::new();
        let mut missing_index: HashMap<&str, usize> = HashMap::new();

        for text in &originals {
            if self.inner.passes_through(text, &target) {
                slots.push(Slot::Ready(text.clone()));
                continue;
            }
            let key = CacheKey::new(&source, &target, text);
            if let Some(cached) = self.inner.store.cached(&key) {
                self.inner.store.metrics().record_cache_hit();
                slots.push(Slot::Ready(cached));
                continue;
            }
            self.inner.store.metrics().record_cache_miss();
            let index = *missing_index.entry(text.as_str()).or_insert_with(|| {
                missing.push(text.as_str());
                missing.len() - 1
            });
            slots.push(Slot::Missing(index));
        }

        let mut translated: Vec<Option<String>> = vec![None; missing.len()];
        if !missing.is_empty() {
            let request = BatchRequest {
                items: missing
                    .iter()
                    .enumerate()
                    .map(|(i, text)| BatchItem {
                        key: i.to_string(),
                        text: text.to_string(),
                    })
                    .collect(),
                source_locale: source.clone(),
                target_locale: target.clone(),
            };

            if let Ok(response) = self.inner.call_provider(&request).await {
                for result in response.results {
                    let Some(index) = result.key.parse::<usize>().ok().filter(|&i| i < missing.len())
                    else {
                        continue;
                    };
                    let original = missing[index];
                    if self.inner.accept(original, &result.translation) {
                        self.inner.store.store_translation(
                            CacheKey::new(&source, &target, original),
                            result.translation.clone(),
                            generation,
                        );
                        translated[index] = Some(result.translation);
                    }
                }
            }
        }

        if self.inner.current_target() != target {
            self.inner.store.metrics().record_stale_discard();
            return originals;
        }

        let mut fallbacks = 0;
        let output: Vec<String> = slots
            .into_iter()
            .zip(&originals)
            .map(|(slot, original)| match slot {
                Slot::Ready(text) => text,
                Slot::Missing(index) => translated[index].clone().unwrap_or_else(|| {
                    fallbacks += 1;
                    original.clone()
                }),
            })
            .collect();
        self.inner.store.metrics().record_fallbacks(fallbacks);
        output
    }

    /// Cached translation without waiting; `None` means a translate call is needed
    pub fn lookup(&self, text: &str) -> Option<String> {
        let target = self.inner.current_target();
        if self.inner.passes_through(text, &target) {
            return Some(text.to_string());
        }
        self.inner.store.cached(&CacheKey::new(
            &self.inner.config.source_locale,
            &target,
            text,
        ))
    }

    /// Send whatever is queued right now instead of waiting for the timer
    pub fn flush(&self) {
        let _ = self.commands.send(Command::Flush);
    }

    /// Stop the batch worker and wait for it to finish.
    ///
    /// Queued callers resolve with their original text; batches already sent
    /// to the provider still complete.
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Batch worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for TranslationCoalescer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::i18n::LanguageSelector;
    use crate::provider::BatchResult;
    use futures::future::{join_all, BoxFuture};
    use std::time::Duration;
    use tokio::time::sleep;

    /// How the scripted provider answers
    enum Mode {
        /// "<target>:<text>" for every item except the listed texts
        Translate { skip: Vec<&'static str> },
        /// Same as `Translate`, after a delay
        Slow(Duration),
        /// The same string for every item
        Fixed(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedProvider {
        mode: Mode,
        requests: Mutex<Vec<(Instant, BatchRequest)>>,
    }

    impl ScriptedProvider {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }

        fn request(&self, index: usize) -> BatchRequest {
            self.requests.lock()[index].1.clone()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.requests.lock().iter().map(|(at, _)| *at).collect()
        }

        fn answer(request: &BatchRequest, skip: &[&str]) -> BatchResponse {
            BatchResponse {
                results: request
                    .items
                    .iter()
                    .filter(|item| !skip.contains(&item.text.as_str()))
                    .map(|item| BatchResult {
                        key: item.key.clone(),
                        translation: format!("{}:{}", request.target_locale, item.text),
                    })
                    .collect(),
            }
        }
    }

    impl TranslationProvider for ScriptedProvider {
        fn translate_batch<'a>(
            &'a self,
            request: &'a BatchRequest,
        ) -> BoxFuture<'a, Result<BatchResponse, ProviderError>> {
            self.requests.lock().push((Instant::now(), request.clone()));
            match &self.mode {
                Mode::Translate { skip } => {
                    let response = Self::answer(request, skip);
                    Box::pin(async move { Ok(response) })
                }
                Mode::Slow(delay) => {
                    let delay = *delay;
                    let response = Self::answer(request, &[]);
                    Box::pin(async move {
                        sleep(delay).await;
                        Ok(response)
                    })
                }
                Mode::Fixed(text) => {
                    let response = BatchResponse {
                        results: request
                            .items
                            .iter()
                            .map(|item| BatchResult {
                                key: item.key.clone(),
                                translation: text.to_string(),
                            })
                            .collect(),
                    };
                    Box::pin(async move { Ok(response) })
                }
                Mode::Fail => {
                    Box::pin(async { Err(ProviderError::Failed("gateway unavailable".into())) })
                }
                Mode::Hang => Box::pin(futures::future::pending()),
            }
        }
    }

    struct Harness {
        coalescer: Arc<TranslationCoalescer>,
        provider: Arc<ScriptedProvider>,
        selector: LanguageSelector,
        store: Arc<TranslationStore>,
    }

    fn locale(tag: &str) -> Locale {
        Locale::parse(tag).unwrap()
    }

    fn test_config() -> CoalescerConfig {
        CoalescerConfig {
            source_locale: locale("pt-BR"),
            enabled: true,
            debounce: Duration::from_millis(100),
            max_wait: Duration::from_millis(500),
            provider_timeout: Duration::from_secs(2),
        }
    }

    fn new_store() -> Arc<TranslationStore> {
        Arc::new(TranslationStore::new(&CacheConfig::default()))
    }

    fn harness_with(mode: Mode, config: CoalescerConfig) -> Harness {
        let provider = ScriptedProvider::new(mode);
        let selector = LanguageSelector::new(locale("en"));
        let store = new_store();
        let coalescer = Arc::new(TranslationCoalescer::new(
            Arc::clone(&store),
            provider.clone(),
            selector.subscribe(),
            config,
        ));
        Harness {
            coalescer,
            provider,
            selector,
            store,
        }
    }

    fn harness(mode: Mode) -> Harness {
        harness_with(mode, test_config())
    }

    fn translating() -> Mode {
        Mode::Translate { skip: Vec::new() }
    }

    // ==================== Short-circuit Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_identity_when_target_is_source() {
        let h = harness(translating());
        h.selector.set(locale("pt-br"));

        let mut task = tokio_test::task::spawn(h.coalescer.translate("Olá", None));
        tokio_test::assert_ready_eq!(task.poll(), "Olá".to_string());

        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.store.metrics().cache_misses(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_when_disabled() {
        let config = CoalescerConfig {
            enabled: false,
            ..test_config()
        };
        let h = harness_with(translating(), config);

        assert_eq!(h.coalescer.translate("Olá", None).await, "Olá");
        assert_eq!(
            h.coalescer.translate_batch(&["Olá", "Tchau"]).await,
            vec!["Olá", "Tchau"]
        );
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_text_passes_through() {
        let h = harness(translating());

        assert_eq!(h.coalescer.translate("", None).await, "");
        assert_eq!(h.coalescer.translate("   ", None).await, "   ");
        assert_eq!(h.provider.calls(), 0);
    }

    // ==================== Cache and De-duplication Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_second_call_is_served_from_cache() {
        let h = harness(translating());

        assert_eq!(h.coalescer.translate("Olá", Some("greeting")).await, "en:Olá");
        assert_eq!(h.coalescer.translate("Olá", Some("greeting")).await, "en:Olá");

        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.store.metrics().cache_hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_request() {
        let h = harness(translating());

        let (a, b) = tokio::join!(
            h.coalescer.translate("Olá", None),
            h.coalescer.translate("Olá", None)
        );

        assert_eq!(a, "en:Olá");
        assert_eq!(b, "en:Olá");
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.provider.request(0).items.len(), 1);
        assert_eq!(h.store.metrics().dedup_joins(), 1);
        assert_eq!(h.store.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_shared_between_coalescers() {
        let h = harness(translating());
        let other = TranslationCoalescer::new(
            Arc::clone(&h.store),
            h.provider.clone(),
            h.selector.subscribe(),
            test_config(),
        );

        let (a, b) = tokio::join!(
            h.coalescer.translate("Clientes", None),
            other.translate("Clientes", None)
        );

        assert_eq!(a, "en:Clientes");
        assert_eq!(b, "en:Clientes");
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(other.lookup("Clientes"), Some("en:Clientes".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_only_reads_cache() {
        let h = harness(translating());

        assert_eq!(h.coalescer.lookup("Olá"), None);
        h.coalescer.translate("Olá", None).await;
        assert_eq!(h.coalescer.lookup("Olá"), Some("en:Olá".to_string()));
        assert_eq!(h.coalescer.lookup(""), Some(String::new()));
        assert_eq!(h.provider.calls(), 1);
    }

    // ==================== Batching Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_calls_within_window_coalesce() {
        let h = harness(translating());
        let texts: Vec<String> = (0..5).map(|i| format!("texto {}", i)).collect();

        let calls = texts.iter().enumerate().map(|(i, text)| {
            let coalescer = &h.coalescer;
            async move {
                sleep(Duration::from_millis(10 * i as u64)).await;
                coalescer.translate(text, None).await
            }
        });
        let results = join_all(calls).await;

        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.provider.request(0).items.len(), 5);
        for (text, result) in texts.iter().zip(&results) {
            assert_eq!(result, &format!("en:{}", text));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_flushes_under_sustained_load() {
        let config = CoalescerConfig {
            debounce: Duration::from_millis(100),
            max_wait: Duration::from_millis(300),
            ..test_config()
        };
        let h = harness_with(translating(), config);
        let texts: Vec<String> = (0..20).map(|i| format!("linha {}", i)).collect();
        let start = Instant::now();

        // One arrival every 50ms never leaves a 100ms quiet period
        let calls = texts.iter().enumerate().map(|(i, text)| {
            let coalescer = &h.coalescer;
            async move {
                sleep(Duration::from_millis(50 * i as u64)).await;
                coalescer.translate(text, None).await
            }
        });
        let results = join_all(calls).await;

        assert!(h.provider.calls() >= 3, "got {} calls", h.provider.calls());
        assert!(h.provider.call_times()[0] - start <= Duration::from_millis(300));
        assert!(h.provider.request(0).items.len() <= 7);

        let total: usize = (0..h.provider.calls())
            .map(|i| h.provider.request(i).items.len())
            .sum();
        assert_eq!(total, 20);
        assert!(results.iter().all(|r| r.starts_with("en:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_flush_skips_debounce() {
        let config = CoalescerConfig {
            debounce: Duration::from_secs(60),
            max_wait: Duration::from_secs(60),
            ..test_config()
        };
        let h = harness_with(translating(), config);

        let coalescer = Arc::clone(&h.coalescer);
        let handle = tokio::spawn(async move { coalescer.translate("Olá", None).await });
        sleep(Duration::from_millis(10)).await;
        h.coalescer.flush();

        let result = timeout(Duration::from_secs(1), handle)
            .await
            .expect("Flush should resolve well before the debounce window")
            .unwrap();
        assert_eq!(result, "en:Olá");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_caller_keys_do_not_collide() {
        let h = harness(translating());

        let (a, b) = tokio::join!(
            h.coalescer.translate("Receita", Some("card-title")),
            h.coalescer.translate("Despesa", Some("card-title"))
        );

        assert_eq!(a, "en:Receita");
        assert_eq!(b, "en:Despesa");
        let request = h.provider.request(0);
        assert_eq!(request.items.len(), 2);
        assert_ne!(request.items[0].key, request.items[1].key);
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_items_with_one_caller_key_get_distinct_keys() {
        let h = harness(translating());
        let texts: Vec<String> = (0..50).map(|i| format!("rótulo {}", i)).collect();

        let results = join_all(
            texts
                .iter()
                .map(|text| h.coalescer.translate(text, Some("label"))),
        )
        .await;

        assert_eq!(h.provider.calls(), 1);
        let request = h.provider.request(0);
        let keys: std::collections::HashSet<&str> =
            request.items.iter().map(|item| item.key.as_str()).collect();
        assert_eq!(keys.len(), 50);
        assert!(keys.contains("label"));
        for (text, result) in texts.iter().zip(&results) {
            assert_eq!(result, &format!("en:{}", text));
        }
    }

    // ==================== translate_batch Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_translate_batch_preserves_order_with_gaps() {
        let h = harness(Mode::Translate { skip: vec!["B"] });

        let result = h.coalescer.translate_batch(&["A", "B", "C"]).await;

        assert_eq!(result, vec!["en:A", "B", "en:C"]);
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_translate_batch_only_requests_uncached_unique_texts() {
        let h = harness(translating());
        h.coalescer.translate("A", None).await;

        let result = h.coalescer.translate_batch(&["A", "B", "B", ""]).await;

        assert_eq!(result, vec!["en:A", "en:B", "en:B", ""]);
        assert_eq!(h.provider.calls(), 2);
        let request = h.provider.request(1);
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.items[0].text, "B");
        assert_eq!(h.coalescer.lookup("B"), Some("en:B".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_translate_batch_total_failure_returns_originals() {
        let h = harness(Mode::Fail);

        let result = h.coalescer.translate_batch(&["A", "B", "C"]).await;

        assert_eq!(result, vec!["A", "B", "C"]);
        assert_eq!(h.store.cache_len(), 0);
        assert_eq!(h.store.metrics().api_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_translate_batch_empty_input() {
        let h = harness(translating());
        let empty: [&str; 0] = [];

        assert!(h.coalescer.translate_batch(&empty).await.is_empty());
        assert_eq!(h.provider.calls(), 0);
    }

    // ==================== Language Change Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_language_switch_triggers_fresh_request() {
        let h = harness(translating());

        assert_eq!(h.coalescer.translate("Olá", None).await, "en:Olá");
        h.selector.set(locale("fr"));
        assert_eq!(h.coalescer.translate("Olá", None).await, "fr:Olá");

        assert_eq!(h.provider.calls(), 2);
        assert_eq!(h.provider.request(1).target_locale, locale("fr"));
        assert_eq!(h.store.metrics().invalidations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_arriving_after_switch_is_discarded() {
        let h = harness(Mode::Slow(Duration::from_millis(500)));

        let coalescer = Arc::clone(&h.coalescer);
        let handle = tokio::spawn(async move { coalescer.translate("Olá", None).await });

        // Batch is in flight once the debounce window has passed
        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.provider.calls(), 1);
        h.selector.set(locale("fr"));

        assert_eq!(handle.await.unwrap(), "Olá");
        assert!(h.store.metrics().stale_discards() >= 1);
        assert_eq!(h.coalescer.lookup("Olá"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_translate_batch_discards_result_after_switch() {
        let h = harness(Mode::Slow(Duration::from_millis(500)));

        let coalescer = Arc::clone(&h.coalescer);
        let handle =
            tokio::spawn(async move { coalescer.translate_batch(&["Olá", "", "Tchau"]).await });

        sleep(Duration::from_millis(100)).await;
        assert_eq!(h.provider.calls(), 1);
        h.selector.set(locale("fr"));

        let result = handle.await.unwrap();
        assert_eq!(result, vec!["Olá", "", "Tchau"]);
        assert!(h.store.metrics().stale_discards() >= 1);
        assert_eq!(h.store.cache_len(), 0);

        h.selector.set(locale("en"));
        assert_eq!(h.coalescer.lookup("Olá"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_target_lookup_keeps_new_language_cache() {
        let h = harness(translating());
        h.selector.set(locale("fr"));
        assert_eq!(h.coalescer.translate("Olá", None).await, "fr:Olá");
        let generation = h.store.generation();

        // Reads with the pre-switch language miss without wiping the "fr" entries
        let stale = CacheKey::new(&locale("pt-BR"), &locale("en"), "Olá");
        assert_eq!(h.store.cached(&stale), None);
        assert!(matches!(h.store.begin(&stale).1, Lookup::Registered { .. }));

        assert_eq!(h.coalescer.lookup("Olá"), Some("fr:Olá".to_string()));
        assert_eq!(h.store.generation(), generation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_uses_language_active_at_flush_time() {
        let h = harness(translating());

        let coalescer = Arc::clone(&h.coalescer);
        let handle = tokio::spawn(async move { coalescer.translate("Olá", None).await });
        sleep(Duration::from_millis(10)).await;
        h.selector.set(locale("es"));

        // Queued under "en": the caller gets the original, the "es" result is cached
        assert_eq!(handle.await.unwrap(), "Olá");
        assert_eq!(h.provider.request(0).target_locale, locale("es"));
        assert_eq!(h.coalescer.lookup("Olá"), Some("es:Olá".to_string()));
    }

    // ==================== Failure Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_returns_original() {
        let h = harness(Mode::Fail);

        assert_eq!(h.coalescer.translate("Olá", None).await, "Olá");

        assert_eq!(h.store.cache_len(), 0);
        assert_eq!(h.store.pending_len(), 0);
        assert_eq!(h.store.metrics().api_failures(), 1);
        assert_eq!(h.store.metrics().fallbacks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_key_is_retried_on_next_call() {
        let h = harness(Mode::Fail);

        h.coalescer.translate("Olá", None).await;
        h.coalescer.translate("Olá", None).await;

        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_returns_original() {
        let h = harness(Mode::Hang);

        assert_eq!(h.coalescer.translate("Olá", None).await, "Olá");
        assert_eq!(h.store.metrics().api_failures(), 1);
        assert_eq!(h.store.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_in_response_falls_back() {
        let h = harness(Mode::Translate { skip: vec!["Tchau"] });

        let (a, b) = tokio::join!(
            h.coalescer.translate("Olá", None),
            h.coalescer.translate("Tchau", None)
        );

        assert_eq!(a, "en:Olá");
        assert_eq!(b, "Tchau");
        assert_eq!(h.store.cache_len(), 1);
        assert_eq!(h.store.metrics().api_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_translation_is_not_cached() {
        let h = harness(Mode::Fixed("items"));

        assert_eq!(
            h.coalescer.translate("{count} itens", None).await,
            "{count} itens"
        );
        assert_eq!(h.store.cache_len(), 0);
        assert_eq!(h.store.metrics().rejected(), 1);
    }

    // ==================== Teardown Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_dispose_with_armed_timer_sends_nothing() {
        let h = harness(translating());

        let coalescer = Arc::clone(&h.coalescer);
        let handle = tokio::spawn(async move { coalescer.translate("Olá", None).await });
        sleep(Duration::from_millis(10)).await;

        h.coalescer.dispose().await;
        sleep(Duration::from_secs(5)).await;

        assert_eq!(h.provider.calls(), 0);
        assert_eq!(handle.await.unwrap(), "Olá");
        assert_eq!(h.store.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_translate_after_dispose_returns_original() {
        let h = harness(translating());
        h.coalescer.dispose().await;

        assert_eq!(h.coalescer.translate("Olá", None).await, "Olá");
        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.store.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_returns_queued_items_as_original() {
        let h = harness(translating());
        let doomed = TranslationCoalescer::new(
            Arc::clone(&h.store),
            h.provider.clone(),
            h.selector.subscribe(),
            test_config(),
        );

        // Register and enqueue on `doomed` without waiting for the answer
        {
            let mut task = tokio_test::task::spawn(doomed.translate("Olá", None));
            assert!(task.poll().is_pending());
        }
        drop(doomed);

        // Joins the request queued on the dropped coalescer
        assert_eq!(h.coalescer.translate("Olá", None).await, "Olá");
        sleep(Duration::from_secs(5)).await;

        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.store.pending_len(), 0);
    }
}
