//! Messaging-platform port.
//!
//! The pipeline and the chat handlers only talk to the chat through
//! [`Messenger`]; [`TelegramClient`] is the production adapter.

mod telegram;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::transfer::ProgressSample;

pub use telegram::TelegramClient;

pub type ChatId = i64;

/// A message that can later be edited or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

impl MessageRef {
    pub const fn new(chat_id: ChatId, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

pub type Keyboard = Vec<Vec<Button>>;

/// A local media file to deliver.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub chat_id: ChatId,
    pub path: PathBuf,
    pub caption: String,
    pub thumbnail: Option<PathBuf>,
    pub duration_secs: u64,
    pub spoiler: bool,
}

#[derive(Debug, Error)]
pub enum MessengerError {
    /// Editing a message to its current content.
    #[error("message is not modified")]
    NotModified,

    /// Flood control; the call may be retried after `retry_after` seconds.
    #[error("flood control, retry after {retry_after}s")]
    FloodWait { retry_after: u64 },

    #[error("chat API error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MessengerError {
    /// Errors a status render can ignore without logging at warn level.
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::NotModified | Self::FloodWait { .. })
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, MessengerError>;

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo_url: &str,
        caption: &str,
        keyboard: Option<Keyboard>,
        spoiler: bool,
    ) -> Result<MessageRef, MessengerError>;

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessengerError>;

    async fn delete_message(&self, message: MessageRef) -> Result<(), MessengerError>;

    /// Uploads a video, publishing `Uploading` samples to `progress` as
    /// bytes leave the process.
    async fn send_video(
        &self,
        upload: VideoUpload,
        progress: watch::Sender<ProgressSample>,
    ) -> Result<MessageRef, MessengerError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), MessengerError>;
}
