//! Locale type: Validated, normalized language tag.
//!
//! Every locale that reaches the cache or the provider goes through
//! `Locale::parse`, so two spellings of the same tag ("pt-BR", "pt_br")
//! always produce the same cache key.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated language tag.
///
/// Accepted shapes are a 2-3 letter primary subtag optionally followed by a
/// 2-4 character region or script subtag (e.g. "en", "pt-BR", "zh-Hant").
/// The stored form is lowercase with `-` as separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale {
    tag: String,
}

impl Locale {
    /// Parse and normalize a language tag.
    ///
    /// # Returns
    /// * `Ok(Locale)` if the tag is well formed
    /// * `Err` if the tag is empty or malformed
    pub fn parse(tag: &str) -> Result<Locale> {
        let normalized = tag.trim().replace('_', "-").to_lowercase();
        if normalized.is_empty() {
            bail!("Locale tag is empty");
        }

        let mut parts = normalized.split('-');
        let primary = parts.next().unwrap_or_default();
        if !(2..=3).contains(&primary.len()) || !primary.chars().all(|c| c.is_ascii_lowercase())
        {
            bail!("Invalid primary language subtag in '{}'", tag);
        }

        if let Some(region) = parts.next() {
            if !(2..=4).contains(&region.len()) || !region.chars().all(|c| c.is_ascii_alphanumeric())
            {
                bail!("Invalid region subtag in '{}'", tag);
            }
        }

        if parts.next().is_some() {
            bail!("Too many subtags in '{}'", tag);
        }

        Ok(Locale { tag: normalized })
    }

    /// The normalized tag (e.g. "pt-br").
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    /// The primary language subtag (e.g. "pt" for "pt-br").
    pub fn language(&self) -> &str {
        self.tag.split('-').next().unwrap_or(&self.tag)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

impl TryFrom<String> for Locale {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Locale::parse(&value)
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.tag
    }
}

impl std::str::FromStr for Locale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Locale::parse(s)
    }
}
