//! Translation provider: the coalescer's only wire boundary.
//!
//! The provider accepts a list of `{key, text}` items plus source and target
//! locale, and answers with `{key, translation}` pairs. The answer may cover
//! only a subset of the items.

use crate::config::Config;
use crate::i18n::Locale;
use crate::retry::{with_retry_if, RetryPolicy};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Batch translation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
    pub source_locale: Locale,
    pub target_locale: Locale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub key: String,
    pub text: String,
}

/// Batch translation response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<BatchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub key: String,
    pub translation: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to translation provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("translation provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid translation provider response: {0}")]
    InvalidResponse(String),

    #[error("translation provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("translation provider failed: {0}")]
    Failed(String),
}

impl ProviderError {
    /// Network errors, 429 and 5xx are worth another attempt; other 4xx and
    /// malformed bodies are not
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::InvalidResponse(_)
            | ProviderError::Timeout(_)
            | ProviderError::Failed(_) => false,
        }
    }
}

/// Remote batch translation.
///
/// Implementations may fail; the coalescer absorbs every error and answers
/// callers with their original text.
pub trait TranslationProvider: Send + Sync {
    fn translate_batch<'a>(
        &'a self,
        request: &'a BatchRequest,
    ) -> BoxFuture<'a, Result<BatchResponse, ProviderError>>;
}

/// Provider that POSTs the batch as JSON to an HTTP endpoint
pub struct HttpTranslationProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpTranslationProvider {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            api_key,
            retry: RetryPolicy::provider_call(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        Self::new(config.provider_url.clone(), config.provider_api_key.clone())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send(&self, request: &BatchRequest) -> Result<BatchResponse, ProviderError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(ProviderError::Status { status, body });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

impl TranslationProvider for HttpTranslationProvider {
    fn translate_batch<'a>(
        &'a self,
        request: &'a BatchRequest,
    ) -> BoxFuture<'a, Result<BatchResponse, ProviderError>> {
        Box::pin(async move {
            with_retry_if(
                &self.retry,
                &format!(
                    "Batch translation {} -> {} ({} items)",
                    request.source_locale,
                    request.target_locale,
                    request.items.len()
                ),
                || self.send(request),
                ProviderError::is_retryable,
            )
            .await
        })
    }
}
