use crate::i18n::Locale;
use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Translation provider
    pub provider_url: String,
    pub provider_api_key: Option<String>,
    pub provider_timeout_secs: u64,

    // Locales
    pub source_locale: Locale,
    pub default_target_locale: Locale,
    pub translation_enabled: bool,

    // Batching
    pub batch_debounce_ms: u64,
    pub batch_max_wait_ms: u64,

    // Cache
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,

    // Service
    pub api_key: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source_locale = Locale::parse(
            &std::env::var("SOURCE_LOCALE").unwrap_or_else(|_| "pt-BR".to_string()),
        )
        .context("SOURCE_LOCALE is not a valid locale")?;

        let default_target_locale = match std::env::var("DEFAULT_TARGET_LOCALE") {
            Ok(value) => {
                Locale::parse(&value).context("DEFAULT_TARGET_LOCALE is not a valid locale")?
            }
            Err(_) => source_locale.clone(),
        };

        Ok(Self {
            // Translation provider
            provider_url: std::env::var("TRANSLATION_PROVIDER_URL")
                .context("TRANSLATION_PROVIDER_URL not set")?,
            provider_api_key: std::env::var("TRANSLATION_PROVIDER_API_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            provider_timeout_secs: env_parse("PROVIDER_TIMEOUT_SECS", 10),

            // Locales
            source_locale,
            default_target_locale,
            translation_enabled: std::env::var("TRANSLATION_ENABLED")
                .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "off"))
                .unwrap_or(true),

            // Batching
            batch_debounce_ms: env_parse("BATCH_DEBOUNCE_MS", 100),
            batch_max_wait_ms: env_parse("BATCH_MAX_WAIT_MS", 500),

            // Cache
            cache_capacity: env_parse("CACHE_CAPACITY", 10_000),
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", 86_400),

            // Service
            api_key: std::env::var("API_KEY").ok().filter(|v| !v.is_empty()),
            port: env_parse("PORT", 8080),
        })
    }

    /// The subset of settings the coalescer core needs
    pub fn coalescer(&self) -> CoalescerConfig {
        CoalescerConfig {
            source_locale: self.source_locale.clone(),
            enabled: self.translation_enabled,
            debounce: Duration::from_millis(self.batch_debounce_ms),
            max_wait: Duration::from_millis(self.batch_max_wait_ms.max(self.batch_debounce_ms)),
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
        }
    }

    /// Cache bounds for the shared translation store
    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache_capacity.max(1),
            ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }
}

/// Settings for one coalescer instance
#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    pub source_locale: Locale,
    /// Master switch; when false every call returns its input unchanged
    pub enabled: bool,
    /// Quiet period after the last arrival before a batch is flushed
    pub debounce: Duration,
    /// Hard deadline from the first queued item, regardless of new arrivals
    pub max_wait: Duration,
    pub provider_timeout: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            source_locale: Locale::parse("pt-BR").expect("static locale is valid"),
            enabled: true,
            debounce: Duration::from_millis(100),
            max_wait: Duration::from_millis(500),
            provider_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(86_400),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
