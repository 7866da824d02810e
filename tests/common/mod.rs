#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

use vidrelay::backend::{BackendError, MediaBackend, MediaInfo};
use vidrelay::messenger::{ChatId, Keyboard, MessageRef, Messenger, MessengerError, VideoUpload};
use vidrelay::pipeline::{PipelineConfig, TransferPipeline};
use vidrelay::slots::SlotManager;
use vidrelay::transfer::{ProgressSample, Stage};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SendText {
        chat: ChatId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    SendPhoto {
        chat: ChatId,
        url: String,
        caption: String,
        keyboard: Option<Keyboard>,
    },
    Edit {
        message: MessageRef,
        text: String,
    },
    Delete(MessageRef),
    SendVideo {
        chat: ChatId,
        caption: String,
        thumbnail: Option<PathBuf>,
        size: u64,
        sent: MessageRef,
    },
    Answer {
        id: String,
        text: Option<String>,
        alert: bool,
    },
}

/// Records every call; message ids are handed out from 100 upwards.
pub struct FakeMessenger {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicI64,
    pub fail_photo: AtomicBool,
    pub fail_upload: AtomicBool,
    /// Rejects every edit, alternating flood control and a 400.
    pub fail_edits: AtomicBool,
    edit_attempts: AtomicI64,
    /// Chats that reject messages with 403, like a user who blocked the bot.
    pub blocked: Mutex<Vec<ChatId>>,
}

impl Default for FakeMessenger {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(100),
            fail_photo: AtomicBool::new(false),
            fail_upload: AtomicBool::new(false),
            fail_edits: AtomicBool::new(false),
            edit_attempts: AtomicI64::new(0),
            blocked: Mutex::new(Vec::new()),
        }
    }
}

impl FakeMessenger {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SendText { chat: to, text, .. } if to == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits_of(&self, message: MessageRef) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Edit { message: edited, text } if edited == message => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edit_attempts(&self) -> i64 {
        self.edit_attempts.load(Ordering::SeqCst)
    }

    pub fn videos(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::SendVideo { .. }))
            .collect()
    }

    pub fn answers(&self) -> Vec<(Option<String>, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Answer { text, alert, .. } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_ref(&self, chat: ChatId) -> MessageRef {
        MessageRef::new(chat, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_blocked(&self, chat: ChatId) -> Result<(), MessengerError> {
        if self.blocked.lock().unwrap().contains(&chat) {
            return Err(MessengerError::Api {
                code: 403,
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, MessengerError> {
        self.check_blocked(chat_id)?;
        self.record(Call::SendText {
            chat: chat_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(self.next_ref(chat_id))
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo_url: &str,
        caption: &str,
        keyboard: Option<Keyboard>,
        _spoiler: bool,
    ) -> Result<MessageRef, MessengerError> {
        if self.fail_photo.load(Ordering::SeqCst) {
            return Err(MessengerError::Api {
                code: 400,
                description: "Bad Request: wrong file identifier".into(),
            });
        }
        self.record(Call::SendPhoto {
            chat: chat_id,
            url: photo_url.to_string(),
            caption: caption.to_string(),
            keyboard,
        });
        Ok(self.next_ref(chat_id))
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        _keyboard: Option<Keyboard>,
    ) -> Result<(), MessengerError> {
        let attempt = self.edit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(if attempt % 2 == 0 {
                MessengerError::FloodWait { retry_after: 5 }
            } else {
                MessengerError::Api {
                    code: 400,
                    description: "Bad Request: message to edit not found".into(),
                }
            });
        }
        self.record(Call::Edit {
            message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), MessengerError> {
        self.record(Call::Delete(message));
        Ok(())
    }

    async fn send_video(
        &self,
        upload: VideoUpload,
        progress: watch::Sender<ProgressSample>,
    ) -> Result<MessageRef, MessengerError> {
        let size = tokio::fs::metadata(&upload.path).await?.len();
        progress.send_replace(ProgressSample::new(Stage::Uploading, size / 2, size));
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(MessengerError::Transport("connection reset".into()));
        }
        progress.send_replace(ProgressSample::new(Stage::Uploading, size, size));

        let sent = self.next_ref(upload.chat_id);
        self.record(Call::SendVideo {
            chat: upload.chat_id,
            caption: upload.caption,
            thumbnail: upload.thumbnail,
            size,
            sent,
        });
        Ok(sent)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), MessengerError> {
        self.record(Call::Answer {
            id: callback_id.to_string(),
            text: text.map(ToString::to_string),
            alert: show_alert,
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum DownloadScript {
    /// Write these bytes to the destination and succeed.
    Write(Vec<u8>),
    /// Leave a partial file behind and fail with this message.
    Fail(String),
    /// Report success without writing anything.
    NoFile,
}

pub struct FakeBackend {
    pub info: Mutex<Option<MediaInfo>>,
    pub script: Mutex<DownloadScript>,
    pub thumbnail_ok: AtomicBool,
    /// When set, a download signals `started` after writing its output and
    /// waits for a `release` permit or its cancel token.
    pub hold: AtomicBool,
    /// A held download waits for `release` only, like an extractor that
    /// cannot be interrupted.
    pub ignore_cancel: AtomicBool,
    pub started: Semaphore,
    pub release: Semaphore,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            info: Mutex::new(Some(MediaInfo {
                title: "Sample clip".into(),
                duration_secs: 125,
                thumbnail_url: Some("https://img.example/thumb.jpg".into()),
            })),
            script: Mutex::new(DownloadScript::Write(vec![7; 4096])),
            thumbnail_ok: AtomicBool::new(true),
            hold: AtomicBool::new(false),
            ignore_cancel: AtomicBool::new(false),
            started: Semaphore::new(0),
            release: Semaphore::new(0),
        }
    }
}

impl FakeBackend {
    pub fn holding() -> Self {
        let backend = Self::default();
        backend.hold.store(true, Ordering::SeqCst);
        backend
    }

    pub fn scripted(script: DownloadScript) -> Self {
        let backend = Self::default();
        *backend.script.lock().unwrap() = script;
        backend
    }

    pub async fn wait_started(&self) {
        self.started.acquire().await.unwrap().forget();
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn resolve(&self, _url: &str) -> Result<MediaInfo, BackendError> {
        self.info
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BackendError::Failed("Unsupported or invalid URL.".into()))
    }

    async fn download(
        &self,
        _url: &str,
        dest: &Path,
        progress: watch::Sender<ProgressSample>,
        cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        let script = self.script.lock().unwrap().clone();
        match script {
            DownloadScript::Write(bytes) => {
                let total = bytes.len() as u64;
                progress.send_replace(ProgressSample::new(Stage::Downloading, total / 2, total));
                tokio::fs::write(dest, &bytes).await?;
                progress.send_replace(ProgressSample::new(Stage::Downloading, total, total));
            }
            DownloadScript::Fail(message) => {
                tokio::fs::write(part_path(dest), b"partial").await?;
                return Err(BackendError::Failed(message));
            }
            DownloadScript::NoFile => {}
        }

        if self.hold.load(Ordering::SeqCst) {
            self.started.add_permits(1);
            if self.ignore_cancel.load(Ordering::SeqCst) {
                self.release.acquire().await.unwrap().forget();
                return Ok(());
            }
            tokio::select! {
                permit = self.release.acquire() => permit.unwrap().forget(),
                () = cancel.cancelled() => return Err(BackendError::Interrupted),
            }
        }
        Ok(())
    }

    async fn fetch_thumbnail(&self, _url: &str, dest: &Path) -> bool {
        self.thumbnail_ok.load(Ordering::SeqCst) && tokio::fs::write(dest, b"jpg").await.is_ok()
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

pub fn pipeline_config(dir: &Path, self_destruct: Duration) -> PipelineConfig {
    PipelineConfig {
        download_dir: dir.to_path_buf(),
        self_destruct,
        progress_interval: Duration::from_millis(10),
    }
}

pub fn build_pipeline(
    max: usize,
    backend: Arc<FakeBackend>,
    messenger: Arc<FakeMessenger>,
    config: PipelineConfig,
) -> TransferPipeline {
    TransferPipeline::new(SlotManager::new(max), backend, messenger, config)
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

/// Polls `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
