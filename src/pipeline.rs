//! Transfer pipeline: download, check for cancellation, upload, optionally
//! self-destruct, and always clean up.
//!
//! ```text
//! SlotPending -> Downloading -> PostDownloadCheck -> Uploading -> SelfDestructWait? -> Done
//!                     |                 |    \-> Cancelled
//!                     \-----------------+-------> Failed
//! ```
//!
//! `Cleanup` runs exactly once after any terminal state, and releases the
//! slot only after the transfer's files are gone.

use std::future::Future;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::MediaBackend;
use crate::cancel::CancellationRegistry;
use crate::error::TransferError;
use crate::format::{escape_html, format_duration, shorten_title};
use crate::messenger::{MessageRef, Messenger, VideoUpload};
use crate::progress::StatusReporter;
use crate::slots::SlotManager;
use crate::transfer::{
    ProgressSample, Stage, TransferHandle, TransferId, TransferRequest, TransferState,
};

const CANCEL_TITLE_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub download_dir: PathBuf,
    /// Delay before a delivered video is deleted; zero disables.
    pub self_destruct: Duration,
    /// Minimum spacing between status renders.
    pub progress_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Delivered,
    Cancelled,
    Failed(TransferError),
}

/// A transfer that passed admission and is running in its own task.
///
/// Dropping this detaches the task; outcomes still reach the user through
/// the status message.
#[derive(Debug)]
pub struct SubmittedTransfer {
    pub id: TransferId,
    task: JoinHandle<TransferOutcome>,
}

impl SubmittedTransfer {
    pub async fn outcome(self) -> TransferOutcome {
        self.task.await.unwrap_or_else(|error| {
            TransferOutcome::Failed(TransferError::TransferFailed(format!(
                "transfer task ended abnormally: {error}"
            )))
        })
    }
}

#[derive(Clone)]
pub struct TransferPipeline {
    slots: SlotManager,
    cancellations: CancellationRegistry,
    backend: Arc<dyn MediaBackend>,
    messenger: Arc<dyn Messenger>,
    config: Arc<PipelineConfig>,
}

impl TransferPipeline {
    pub fn new(
        slots: SlotManager,
        backend: Arc<dyn MediaBackend>,
        messenger: Arc<dyn Messenger>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cancellations: CancellationRegistry::new(&slots),
            slots,
            backend,
            messenger,
            config: Arc::new(config),
        }
    }

    pub const fn slots(&self) -> &SlotManager {
        &self.slots
    }

    pub const fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Starts a confirmed transfer and returns without waiting for it.
    ///
    /// Fails with [`TransferError::AdmissionRejected`] when every slot is
    /// taken; in that case no task is spawned and nothing is written.
    pub fn submit(
        &self,
        request: TransferRequest,
        status: MessageRef,
    ) -> Result<SubmittedTransfer, TransferError> {
        let id = TransferId::new(request.requester, Utc::now());
        enter(&id, TransferState::SlotPending);

        let cancel = self.slots.try_reserve(&id)?;
        let handle = TransferHandle::new(id.clone(), status, &self.config.download_dir);

        let pipeline = self.clone();
        let task = tokio::spawn(async move { pipeline.run(request, handle, cancel).await });

        Ok(SubmittedTransfer { id, task })
    }

    async fn run(
        &self,
        request: TransferRequest,
        handle: TransferHandle,
        cancel: CancellationToken,
    ) -> TransferOutcome {
        let result = AssertUnwindSafe(self.execute(&request, &handle, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(TransferError::TransferFailed(
                    "internal error while processing the transfer".to_string(),
                ))
            });

        let outcome = match result {
            Ok(()) => {
                enter(&handle.id, TransferState::Done);
                TransferOutcome::Delivered
            }
            Err(TransferError::Cancelled) => {
                enter(&handle.id, TransferState::Cancelled);
                info!("Transfer {} cancelled by user {}", handle.id, request.requester);
                let text = format!(
                    "❌ <b>Download Canceled</b>\n\nYour request for <code>{}</code> was successfully canceled.",
                    escape_html(&shorten_title(&request.title, CANCEL_TITLE_CHARS))
                );
                self.edit_status(handle.status, &text).await;
                TransferOutcome::Cancelled
            }
            Err(failure) => {
                enter(&handle.id, TransferState::Failed);
                error!(
                    "Download/Upload error for user {} ({}): {failure:?}",
                    request.requester, request.source_url
                );
                let text = format!(
                    "🚫 <b>An Error Occurred:</b>\n<code>{}</code>\nPlease try another link.",
                    escape_html(&failure.user_message())
                );
                self.edit_status(handle.status, &text).await;
                TransferOutcome::Failed(failure)
            }
        };

        self.cleanup(&handle).await;
        outcome
    }

    async fn execute(
        &self,
        request: &TransferRequest,
        handle: &TransferHandle,
        cancel: CancellationToken,
    ) -> Result<(), TransferError> {
        let started = Instant::now();
        let mut reporter = Some(StatusReporter::new(
            Arc::clone(&self.messenger),
            handle.status,
            &request.title,
            &handle.id,
            started,
            self.config.progress_interval,
        ));

        enter(&handle.id, TransferState::Downloading);
        let (progress_tx, progress_rx) = watch::channel(ProgressSample::new(Stage::Downloading, 0, 0));
        let downloaded = track(
            &mut reporter,
            progress_rx,
            self.backend
                .download(&request.source_url, &handle.media_path, progress_tx, cancel),
        )
        .await;

        enter(&handle.id, TransferState::PostDownloadCheck);
        if self.cancellations.is_flagged(&handle.id) {
            return Err(TransferError::Cancelled);
        }
        downloaded.map_err(|error| TransferError::TransferFailed(error.to_string()))?;
        if !file_exists(&handle.media_path).await {
            return Err(TransferError::OutputMissing);
        }

        enter(&handle.id, TransferState::Uploading);
        let thumbnail = match request.thumbnail_url.as_deref() {
            Some(url) if self.backend.fetch_thumbnail(url, &handle.thumb_path).await => {
                Some(handle.thumb_path.clone())
            }
            _ => None,
        };

        self.edit_status(
            handle.status,
            "✅ <code>Download complete!</code>\n\n☁️ <code>Preparing to upload...</code>",
        )
        .await;

        let upload = VideoUpload {
            chat_id: request.requester,
            path: handle.media_path.clone(),
            caption: self.caption(&request.title),
            thumbnail,
            duration_secs: request.duration_secs,
            spoiler: true,
        };

        if let Some(reporter) = reporter.as_mut() {
            reporter.reset_throttle();
        }
        let (progress_tx, progress_rx) = watch::channel(ProgressSample::new(Stage::Uploading, 0, 0));
        let sent = track(
            &mut reporter,
            progress_rx,
            self.messenger.send_video(upload, progress_tx),
        )
        .await
        .map_err(|error| TransferError::TransferFailed(error.to_string()))?;

        if let Err(error) = self.messenger.delete_message(handle.status).await {
            debug!("Could not delete status message for {}: {error}", handle.id);
        }
        info!("Upload finished for user {}.", request.requester);

        if !self.config.self_destruct.is_zero() {
            enter(&handle.id, TransferState::SelfDestructWait);
            tokio::time::sleep(self.config.self_destruct).await;
            match self.messenger.delete_message(sent).await {
                Ok(()) => info!("Self-destructed video for user {}.", request.requester),
                Err(error) => warn!(
                    "Could not self-destruct video for user {}: {error}",
                    request.requester
                ),
            }
        }

        Ok(())
    }

    fn caption(&self, title: &str) -> String {
        let mut caption = format!("🎬 <b>{}</b>", escape_html(title));
        if !self.config.self_destruct.is_zero() {
            caption.push_str(&format!(
                "\n\n<i>🗑️ This video will be deleted in {}.</i>",
                format_duration(self.config.self_destruct.as_secs())
            ));
        }
        caption
    }

    async fn edit_status(&self, status: MessageRef, text: &str) {
        if let Err(error) = self.messenger.edit_text(status, text, None).await {
            if error.is_benign() {
                debug!("Skipped status edit: {error}");
            } else {
                warn!("Status edit failed: {error}");
            }
        }
    }

    async fn cleanup(&self, handle: &TransferHandle) {
        enter(&handle.id, TransferState::Cleanup);
        remove_temp_file(&handle.media_path).await;
        remove_temp_file(&handle.thumb_path).await;
        remove_transfer_leftovers(&self.config.download_dir, &handle.id).await;

        self.cancellations.clear(&handle.id);
        self.slots.release(&handle.id);
    }
}

/// Runs `work` while a spawned task renders its progress samples.
///
/// The reporter is stopped and handed back before this returns, so no render
/// for this stage can land after the caller's next status edit.
async fn track<F, T>(
    reporter: &mut Option<StatusReporter>,
    progress: watch::Receiver<ProgressSample>,
    work: F,
) -> T
where
    F: Future<Output = T>,
{
    let Some(current) = reporter.take() else {
        return work.await;
    };

    let stop = CancellationToken::new();
    let follower = tokio::spawn(current.follow(progress, stop.clone()));
    let result = work.await;
    stop.cancel();

    match follower.await {
        Ok(returned) => *reporter = Some(returned),
        Err(error) => warn!("Status reporter stopped unexpectedly: {error}"),
    }

    result
}

fn enter(id: &TransferId, state: TransferState) {
    debug!(transfer = %id, ?state, "transfer state");
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

async fn remove_temp_file(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await
        && error.kind() != ErrorKind::NotFound
    {
        warn!("Could not delete temporary file {:?}: {error}", path);
    }
}

/// Removes partial outputs the extractor may leave next to the target,
/// e.g. `<id>.mp4.part` or `<id>.f137.mp4`.
async fn remove_transfer_leftovers(download_dir: &Path, id: &TransferId) {
    let prefix = format!("{id}.");
    let mut entries = match tokio::fs::read_dir(download_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not scan download folder for cleanup: {error}");
            }
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate download folder for cleanup: {error}");
                break;
            }
        };

        let owned = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&prefix));
        if owned {
            remove_temp_file(&entry.path()).await;
        }
    }
}
