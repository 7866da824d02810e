//! Media extraction/download port.

mod ytdlp;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::transfer::ProgressSample;

pub use ytdlp::{YtDlp, YtDlpOptions};

/// Metadata resolved without downloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub duration_secs: u64,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The extractor rejected the URL or the media.
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0}s")]
    TimedOut(u64),

    /// The cancel token fired while the download ran.
    #[error("download interrupted")]
    Interrupted,

    #[error("extractor is not installed: {0}")]
    Missing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<MediaInfo, BackendError>;

    /// Downloads `url` to exactly `dest`, publishing `Downloading` samples.
    ///
    /// Implementations may stop early when `cancel` fires; the caller still
    /// decides whether the transfer was cancelled.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: watch::Sender<ProgressSample>,
        cancel: CancellationToken,
    ) -> Result<(), BackendError>;

    /// Best effort. Returns whether a thumbnail was written to `dest`.
    async fn fetch_thumbnail(&self, url: &str, dest: &Path) -> bool;
}
