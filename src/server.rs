//! HTTP front end for a single coalescer.
//!
//! Routes:
//! - `POST /translate`        - translate one string
//! - `POST /translate/batch`  - translate many strings, order preserved
//! - `GET  /language`         - current source and target locale
//! - `PUT  /language`         - switch the target language (admin)
//! - `POST /cache/clear`      - wipe cache and pending requests (admin)
//! - `GET  /metrics`          - translation counters
//! - `GET  /health`           - liveness

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::coalescer::TranslationCoalescer;
use crate::config::Config;
use crate::i18n::{LanguageSelector, Locale, MetricsReport};
use crate::provider::HttpTranslationProvider;
use crate::security::bearer_authorized;
use crate::store::TranslationStore;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub coalescer: Arc<TranslationCoalescer>,
    pub selector: LanguageSelector,
    pub api_key: Option<String>,
}

/// Error type that implements IntoResponse
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request error: {:?}", self.error);
        }
        (
            self.status,
            Json(json!({
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct TranslateBody {
    pub text: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateReply {
    pub translation: String,
}

#[derive(Debug, Deserialize)]
pub struct TranslateBatchBody {
    pub texts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateBatchReply {
    pub translations: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageBody {
    pub target_locale: Locale,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageReply {
    pub source_locale: Locale,
    pub target_locale: Locale,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReply {
    #[serde(flatten)]
    pub report: MetricsReport,
    pub cache_size: usize,
    pub pending_requests: usize,
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if bearer_authorized(authorization, state.api_key.as_deref()) {
        Ok(())
    } else {
        Err(AppError::with_status(
            StatusCode::UNAUTHORIZED,
            anyhow::anyhow!("Missing or invalid API key"),
        ))
    }
}

/// POST /translate
async fn handle_translate(
    State(state): State<AppState>,
    Json(body): Json<TranslateBody>,
) -> Json<TranslateReply> {
    let translation = state
        .coalescer
        .translate(&body.text, body.key.as_deref())
        .await;
    Json(TranslateReply { translation })
}

/// POST /translate/batch
async fn handle_translate_batch(
    State(state): State<AppState>,
    Json(body): Json<TranslateBatchBody>,
) -> Json<TranslateBatchReply> {
    let translations = state.coalescer.translate_batch(&body.texts).await;
    Json(TranslateBatchReply { translations })
}

/// GET /language
async fn handle_get_language(State(state): State<AppState>) -> Json<LanguageReply> {
    Json(LanguageReply {
        source_locale: state.coalescer.source_locale().clone(),
        target_locale: state.selector.current(),
        changed: None,
    })
}

/// PUT /language
async fn handle_set_language(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LanguageBody>,
) -> Result<Json<LanguageReply>, AppError> {
    require_admin(&state, &headers)?;

    let changed = state.selector.set(body.target_locale);
    Ok(Json(LanguageReply {
        source_locale: state.coalescer.source_locale().clone(),
        target_locale: state.selector.current(),
        changed: Some(changed),
    }))
}

/// POST /cache/clear
async fn handle_clear_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &headers)?;
    state.coalescer.store().clear();
    Ok(StatusCode::NO_CONTENT)
}

/// GET /metrics
async fn handle_metrics(State(state): State<AppState>) -> Json<MetricsReply> {
    let store = state.coalescer.store();
    Json(MetricsReply {
        report: store.metrics().report(),
        cache_size: store.cache_len(),
        pending_requests: store.pending_len(),
    })
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/translate", post(handle_translate))
        .route("/translate/batch", post(handle_translate_batch))
        .route(
            "/language",
            get(handle_get_language).put(handle_set_language),
        )
        .route("/cache/clear", post(handle_clear_cache))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the coalescer stack described by `config`
pub fn build_state(config: &Config) -> Result<AppState> {
    let provider = HttpTranslationProvider::from_config(config)
        .context("Failed to build translation provider client")?;
    let store = Arc::new(TranslationStore::new(&config.cache()));
    let selector = LanguageSelector::new(config.default_target_locale.clone());
    let coalescer = TranslationCoalescer::new(
        store,
        Arc::new(provider),
        selector.subscribe(),
        config.coalescer(),
    );

    Ok(AppState {
        coalescer: Arc::new(coalescer),
        selector,
        api_key: config.api_key.clone(),
    })
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Run the translation service until Ctrl+C or SIGTERM
pub async fn run(config: Config) -> Result<()> {
    let state = build_state(&config)?;
    let coalescer = Arc::clone(&state.coalescer);

    info!(
        "Translating {} -> {} (enabled: {}, debounce: {}ms, max wait: {}ms)",
        config.source_locale,
        config.default_target_locale,
        config.translation_enabled,
        config.batch_debounce_ms,
        config.batch_max_wait_ms
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("Translation service listening on http://{}", addr);
    if config.api_key.is_none() {
        info!("API_KEY not set, admin routes are open");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    coalescer.dispose().await;
    info!("Server shutdown complete");

    Ok(())
}
