//! Runtime settings, read from the environment.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::messenger::ChatId;

pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const DEFAULT_SELF_DESTRUCT_SECONDS: u64 = 30;
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 900;
pub const DEFAULT_YT_DLP_FORMAT: &str =
    "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[height<=720][ext=mp4]/best";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: String,
    pub admins: HashSet<ChatId>,
    pub download_dir: PathBuf,
    pub data_dir: PathBuf,
    pub max_concurrent_downloads: usize,
    pub self_destruct: Duration,
    pub progress_interval: Duration,
    pub yt_dlp_binary: String,
    pub yt_dlp_format: String,
    pub yt_dlp_timeout: Duration,
    pub telegram_api_url: String,
    pub webhook_secret: Option<String>,
    /// Public URL registered with Telegram at startup, if set.
    pub webhook_url: Option<String>,
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let text = |name: &str| lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string));
        let number = |name: &str| text(name).and_then(|value| value.parse::<u64>().ok());

        let bot_token = text("BOT_TOKEN").ok_or_else(|| AppError::config("BOT_TOKEN is not set"))?;

        let max_concurrent_downloads = number("MAX_CONCURRENT_DOWNLOADS")
            .and_then(|value| usize::try_from(value).ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);

        Ok(Self {
            bot_token,
            admins: parse_admins(&text("ADMINS").unwrap_or_default()),
            download_dir: PathBuf::from(text("DOWNLOAD_PATH").unwrap_or_else(|| "downloads".into())),
            data_dir: PathBuf::from(text("DATA_PATH").unwrap_or_else(|| "data".into())),
            max_concurrent_downloads,
            self_destruct: Duration::from_secs(
                number("SELF_DESTRUCT_SECONDS").unwrap_or(DEFAULT_SELF_DESTRUCT_SECONDS),
            ),
            progress_interval: Duration::from_millis(
                number("PROGRESS_INTERVAL_MS").unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS),
            ),
            yt_dlp_binary: text("YT_DLP_BIN").unwrap_or_else(|| "yt-dlp".into()),
            yt_dlp_format: text("YT_DLP_FORMAT").unwrap_or_else(|| DEFAULT_YT_DLP_FORMAT.into()),
            yt_dlp_timeout: Duration::from_secs(
                number("YT_DLP_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            ),
            telegram_api_url: text("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.into()),
            webhook_secret: text("WEBHOOK_SECRET"),
            webhook_url: text("WEBHOOK_URL"),
            bind_addr: resolve_bind_addr(text("APP_ADDR"), number("PORT")),
        })
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }
}

/// Comma-separated numeric ids; anything else is skipped.
fn parse_admins(raw: &str) -> HashSet<ChatId> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<ChatId>().ok())
        .collect()
}

fn resolve_bind_addr(configured: Option<String>, port: Option<u64>) -> String {
    if let Some(configured) = configured {
        return configured;
    }

    if let Some(port) = port.and_then(|value| u16::try_from(value).ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
