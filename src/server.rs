//! HTTP surface: a health probe and the Telegram webhook.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::bot::{BotState, Update};
use crate::error::AppError;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct AppState {
    bot: Arc<BotState>,
    webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(bot: Arc<BotState>, webhook_secret: Option<String>) -> Self {
        Self {
            bot,
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let slots = state.bot.pipeline().slots();
    Json(serde_json::json!({
        "status": "ok",
        "activeTransfers": slots.active_count(),
        "maxTransfers": slots.capacity(),
    }))
}

/// Acknowledges immediately; the update is handled in its own task so a
/// slow resolve never makes Telegram redeliver.
async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if let Some(expected) = state.webhook_secret.as_deref() {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            warn!("Rejected webhook call with a missing or wrong secret token");
            return Err(AppError::forbidden("Invalid webhook secret."));
        }
    }

    let update: Update = serde_json::from_slice(&body)
        .map_err(|error| AppError::bad_request(format!("Malformed update: {error}")))?;

    let bot = Arc::clone(&state.bot);
    tokio::spawn(async move { bot.dispatch(update).await });
    Ok(StatusCode::OK)
}
