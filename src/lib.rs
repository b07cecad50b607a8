pub mod cache;
pub mod coalescer;
pub mod config;
pub mod i18n;
pub mod provider;
pub mod retry;
pub mod security;
pub mod server;
pub mod store;

pub use coalescer::TranslationCoalescer;
pub use i18n::{LanguageSelector, Locale};
pub use provider::{HttpTranslationProvider, TranslationProvider};
pub use store::TranslationStore;
