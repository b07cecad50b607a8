//! Translation quality validation module.
//!
//! UI strings carry interpolation placeholders (`{name}`, `{{count}}`) and
//! links that must survive translation untouched. A provider answer that
//! drops one of them is worse than the untranslated source, so it is
//! rejected before it can reach the cache.

use regex::Regex;
use std::sync::OnceLock;

/// Validation report containing errors and warnings about a translation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    /// Problems that make the translation unusable
    pub errors: Vec<String>,

    /// Suspicious but acceptable differences
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// A translation is accepted when it has no errors
    pub fn is_acceptable(&self) -> bool {
        !self.has_errors()
    }
}

/// Validator for provider translations.
pub struct TranslationValidator;

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();
static URL_REGEX: OnceLock<Regex> = OnceLock::new();

/// Sources shorter than this are not checked for length drift
const LENGTH_CHECK_MIN_CHARS: usize = 20;
const MAX_LENGTH_RATIO: f64 = 4.0;

impl TranslationValidator {
    /// Validate a provider translation against its source text.
    ///
    /// Errors:
    /// - blank translation
    /// - a placeholder from the source is missing in the translation
    /// - a URL from the source is missing in the translation
    ///
    /// Warnings:
    /// - translation length drifted more than 4x in either direction
    /// - translation is identical to the source
    pub fn validate(original: &str, translated: &str) -> ValidationReport {
        let mut report = ValidationReport::new();

        if translated.trim().is_empty() {
            report.errors.push("Translation is empty".to_string());
            return report;
        }

        let mut orig_placeholders = Self::extract_placeholders(original);
        let mut trans_placeholders = Self::extract_placeholders(translated);
        orig_placeholders.sort();
        trans_placeholders.sort();
        if orig_placeholders != trans_placeholders {
            report.errors.push(format!(
                "Placeholder mismatch: original has {:?}, translation has {:?}",
                orig_placeholders, trans_placeholders
            ));
        }

        let trans_urls = Self::extract_urls(translated);
        let missing_urls: Vec<String> = Self::extract_urls(original)
            .into_iter()
            .filter(|url| !trans_urls.contains(url))
            .collect();
        if !missing_urls.is_empty() {
            report
                .errors
                .push(format!("URLs missing from translation: {:?}", missing_urls));
        }

        let orig_len = original.chars().count();
        let trans_len = translated.chars().count();
        if orig_len >= LENGTH_CHECK_MIN_CHARS {
            let ratio = trans_len as f64 / orig_len as f64;
            if !(1.0 / MAX_LENGTH_RATIO..=MAX_LENGTH_RATIO).contains(&ratio) {
                report.warnings.push(format!(
                    "Length drift: original has {} chars, translation has {}",
                    orig_len, trans_len
                ));
            }
        }

        if original == translated {
            report
                .warnings
                .push("Translation is identical to the source".to_string());
        }

        report
    }

    /// Extract `{name}` and `{{name}}` placeholders
    fn extract_placeholders(text: &str) -> Vec<String> {
        let regex = PLACEHOLDER_REGEX
            .get_or_init(|| Regex::new(r"\{\{?\s*[A-Za-z0-9_.]+\s*\}?\}").unwrap());

        regex
            .find_iter(text)
            .map(|m| m.as_str().split_whitespace().collect::<String>())
            .collect()
    }

    /// Extract all URLs from text
    fn extract_urls(text: &str) -> Vec<String> {
        let regex = URL_REGEX.get_or_init(|| Regex::new(r"https?://[^\s)\]]+").unwrap());

        regex
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}
