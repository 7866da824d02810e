use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use vidrelay::backend::{MediaBackend, YtDlp, YtDlpOptions};
use vidrelay::bot::BotState;
use vidrelay::config::Settings;
use vidrelay::error::AppError;
use vidrelay::messenger::{Messenger, TelegramClient};
use vidrelay::pipeline::{PipelineConfig, TransferPipeline};
use vidrelay::server::{AppState, router};
use vidrelay::slots::SlotManager;
use vidrelay::store::{JsonUserStore, UserStore};
use vidrelay::sweep::{STALE_FILE_SECONDS, remove_stale_files};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "vidrelay=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Startup error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let settings = Settings::from_env()?;

    for dir in [&settings.download_dir, &settings.data_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|error| AppError::internal(format!("Could not create {dir:?}: {error}")))?;
    }
    remove_stale_files(&settings.download_dir, Duration::from_secs(STALE_FILE_SECONDS)).await;

    let users = JsonUserStore::open(settings.users_file())
        .await
        .map_err(|error| AppError::internal(error.to_string()))?;
    info!("Loaded {} known users", users.user_count().await);

    let telegram = TelegramClient::new(&settings.telegram_api_url, &settings.bot_token)
        .map_err(|error| AppError::internal(format!("Could not create Telegram client: {error}")))?;
    let backend = YtDlp::new(YtDlpOptions {
        binary: settings.yt_dlp_binary.clone(),
        format: settings.yt_dlp_format.clone(),
        timeout: settings.yt_dlp_timeout,
    })
    .map_err(|error| AppError::internal(error.to_string()))?;

    match settings.webhook_url.as_deref() {
        Some(url) => {
            telegram
                .set_webhook(url, settings.webhook_secret.as_deref())
                .await
                .map_err(|error| AppError::internal(format!("Could not register webhook: {error}")))?;
            info!("Webhook registered at {url}");
        }
        None => warn!("WEBHOOK_URL not set; expecting the webhook to be registered already."),
    }
    if settings.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set; webhook calls are not authenticated.");
    }
    if settings.admins.is_empty() {
        warn!("ADMINS not set; the admin panel is unavailable.");
    }

    let messenger: Arc<dyn Messenger> = Arc::new(telegram);
    let backend: Arc<dyn MediaBackend> = Arc::new(backend);
    let users: Arc<dyn UserStore> = Arc::new(users);

    let pipeline = TransferPipeline::new(
        SlotManager::new(settings.max_concurrent_downloads),
        Arc::clone(&backend),
        Arc::clone(&messenger),
        PipelineConfig {
            download_dir: settings.download_dir.clone(),
            self_destruct: settings.self_destruct,
            progress_interval: settings.progress_interval,
        },
    );
    let bot = BotState::new(
        pipeline,
        messenger,
        backend,
        users,
        settings.admins.clone(),
    );
    let app = router(AppState::new(Arc::new(bot), settings.webhook_secret.clone()));

    let addr = settings.bind_addr;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| AppError::internal(format!("Could not bind {addr}: {error}")))?;

    info!(
        "Bot listening on http://{addr} with {} download slots",
        settings.max_concurrent_downloads
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| AppError::internal(format!("HTTP server error: {error}")))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
