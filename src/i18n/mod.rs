//! Internationalization (i18n) building blocks for the coalescer.
//!
//! # Architecture
//!
//! - `locale`: Validated, normalized language tag used in every cache key
//! - `selector`: Externally owned current target language (watch channel)
//! - `validator`: Rejects provider translations that lost placeholders or links
//! - `metrics`: Counters for cache, provider and fallback activity
//!
//! # Example
//!
//! ```rust,ignore
//! use translation_coalescer::i18n::{LanguageSelector, Locale};
//!
//! let selector = LanguageSelector::new(Locale::parse("pt-BR")?);
//! selector.set(Locale::parse("en")?);
//! ```

mod locale;
mod metrics;
mod selector;
mod validator;

pub use locale::Locale;
pub use metrics::{MetricsReport, TranslationMetrics};
pub use selector::LanguageSelector;
pub use validator::{TranslationValidator, ValidationReport};
