//! Language selector: the externally owned "current target language".
//!
//! The selector is the write side of a `tokio::sync::watch` channel. The
//! coalescer only ever holds receivers, so it can observe changes but never
//! drive them.

use crate::i18n::Locale;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Owner of the current target language.
#[derive(Debug, Clone)]
pub struct LanguageSelector {
    tx: Arc<watch::Sender<Locale>>,
}

impl LanguageSelector {
    /// Create a selector starting at `initial`.
    pub fn new(initial: Locale) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// The currently selected target language.
    pub fn current(&self) -> Locale {
        self.tx.borrow().clone()
    }

    /// Switch the target language.
    ///
    /// Returns `true` if the value actually changed. Selecting the language
    /// that is already active does not notify subscribers.
    pub fn set(&self, locale: Locale) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == locale {
                false
            } else {
                *current = locale.clone();
                true
            }
        });
        if changed {
            info!("Target language switched to {}", locale);
        }
        changed
    }

    /// A receiver that observes every change from now on.
    pub fn subscribe(&self) -> watch::Receiver<Locale> {
        self.tx.subscribe()
    }
}
