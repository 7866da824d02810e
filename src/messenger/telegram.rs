use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{
    Body,
    multipart::{Form, Part},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{ChatId, Keyboard, MessageRef, Messenger, MessengerError, VideoUpload};
use crate::transfer::{ProgressSample, Stage};

const REQUEST_TIMEOUT_SECONDS: u64 = 30;
const CONNECT_TIMEOUT_SECONDS: u64 = 10;
const PARSE_MODE: &str = "HTML";

/// Bot API client over HTTPS.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: SentChat,
}

#[derive(Debug, Deserialize)]
struct SentChat {
    id: i64,
}

impl From<SentMessage> for MessageRef {
    fn from(message: SentMessage) -> Self {
        Self::new(message.chat.id, message.message_id)
    }
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, MessengerError> {
        // Uploads can run for minutes, so only JSON calls carry a request timeout.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
            .build()
            .map_err(|error| MessengerError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        })
    }

    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), MessengerError> {
        let mut payload = json!({
            "url": url,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(secret) = secret {
            payload["secret_token"] = json!(secret);
        }

        self.call::<bool>("setWebhook", payload).await.map(|_| ())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Value,
    ) -> Result<T, MessengerError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.endpoint))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .json(&payload)
            .send()
            .await
            .map_err(|error| MessengerError::Transport(error.without_url().to_string()))?;

        decode(method, response).await
    }
}

async fn decode<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> Result<T, MessengerError> {
    let status = response.status();
    let body: ApiResponse<T> = response.json().await.map_err(|error| {
        MessengerError::Transport(format!(
            "{method}: unreadable response ({status}): {}",
            error.without_url()
        ))
    })?;

    if body.ok {
        return body.result.ok_or_else(|| MessengerError::Api {
            code: status.as_u16(),
            description: format!("{method}: response without result"),
        });
    }

    Err(classify_failure(
        body.error_code.unwrap_or(status.as_u16()),
        body.description.unwrap_or_default(),
        body.parameters.and_then(|parameters| parameters.retry_after),
    ))
}

fn classify_failure(code: u16, description: String, retry_after: Option<u64>) -> MessengerError {
    if code == 429 || retry_after.is_some() {
        return MessengerError::FloodWait {
            retry_after: retry_after.unwrap_or(1),
        };
    }

    if description.contains("message is not modified") {
        return MessengerError::NotModified;
    }

    MessengerError::Api { code, description }
}

fn keyboard_markup(keyboard: &Keyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| json!({ "text": button.text, "callback_data": button.callback_data }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn file_name_of(path: &Path, fallback: &str) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or_else(|| fallback.to_string(), ToString::to_string)
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, MessengerError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": PARSE_MODE,
        });
        if let Some(keyboard) = keyboard.as_ref() {
            payload["reply_markup"] = keyboard_markup(keyboard);
        }

        self.call::<SentMessage>("sendMessage", payload)
            .await
            .map(MessageRef::from)
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo_url: &str,
        caption: &str,
        keyboard: Option<Keyboard>,
        spoiler: bool,
    ) -> Result<MessageRef, MessengerError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "photo": photo_url,
            "caption": caption,
            "parse_mode": PARSE_MODE,
            "has_spoiler": spoiler,
        });
        if let Some(keyboard) = keyboard.as_ref() {
            payload["reply_markup"] = keyboard_markup(keyboard);
        }

        self.call::<SentMessage>("sendPhoto", payload)
            .await
            .map(MessageRef::from)
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessengerError> {
        let mut payload = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": text,
            "parse_mode": PARSE_MODE,
        });
        if let Some(keyboard) = keyboard.as_ref() {
            payload["reply_markup"] = keyboard_markup(keyboard);
        }

        // Result is the edited message or `true`; neither is needed.
        self.call::<Value>("editMessageText", payload)
            .await
            .map(|_| ())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), MessengerError> {
        self.call::<bool>(
            "deleteMessage",
            json!({ "chat_id": message.chat_id, "message_id": message.message_id }),
        )
        .await
        .map(|_| ())
    }

    async fn send_video(
        &self,
        upload: VideoUpload,
        progress: watch::Sender<ProgressSample>,
    ) -> Result<MessageRef, MessengerError> {
        let file = tokio::fs::File::open(&upload.path).await?;
        let total = file.metadata().await?.len();
        let sent = Arc::new(AtomicU64::new(0));

        let counted = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                let so_far = sent.fetch_add(bytes.len() as u64, Ordering::Relaxed)
                    + bytes.len() as u64;
                progress.send_replace(ProgressSample::new(Stage::Uploading, so_far, total));
            }
            chunk
        });

        let video = Part::stream_with_length(Body::wrap_stream(counted), total)
            .file_name(file_name_of(&upload.path, "video.mp4"))
            .mime_str("video/mp4")
            .map_err(|error| MessengerError::Transport(error.to_string()))?;

        let mut form = Form::new()
            .text("chat_id", upload.chat_id.to_string())
            .text("caption", upload.caption)
            .text("parse_mode", PARSE_MODE)
            .text("duration", upload.duration_secs.to_string())
            .text("supports_streaming", "true")
            .part("video", video);

        if upload.spoiler {
            form = form.text("has_spoiler", "true");
        }

        if let Some(thumbnail) = upload.thumbnail {
            match tokio::fs::read(&thumbnail).await {
                Ok(bytes) => {
                    let part = Part::bytes(bytes)
                        .file_name(file_name_of(&thumbnail, "thumb.jpg"))
                        .mime_str("image/jpeg")
                        .map_err(|error| MessengerError::Transport(error.to_string()))?;
                    form = form.part("thumbnail", part);
                }
                Err(error) => debug!("Skipping unreadable thumbnail {:?}: {error}", thumbnail),
            }
        }

        let response = self
            .http
            .post(format!("{}/sendVideo", self.endpoint))
            .multipart(form)
            .send()
            .await
            .map_err(|error| MessengerError::Transport(error.without_url().to_string()))?;

        decode::<SentMessage>("sendVideo", response)
            .await
            .map(MessageRef::from)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), MessengerError> {
        let mut payload = json!({
            "callback_query_id": callback_id,
            "show_alert": show_alert,
        });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }

        self.call::<bool>("answerCallbackQuery", payload)
            .await
            .map(|_| ())
    }
}
