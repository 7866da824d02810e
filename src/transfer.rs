//! Data carried through a single transfer.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::messenger::{ChatId, MessageRef};

/// Identifier of a running transfer, `"{requester}-{unix_millis}"`.
///
/// Also used as the stem of the transfer's temporary files, so two live
/// transfers never share a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(requester: ChatId, started_at: DateTime<Utc>) -> Self {
        Self(format!("{requester}-{}", started_at.timestamp_millis()))
    }

    /// Accepts ids echoed back from callback buttons. Only the characters
    /// this type produces are allowed, which keeps them safe as file stems.
    pub fn parse(raw: &str) -> Option<Self> {
        let (requester, millis) = raw.rsplit_once('-')?;
        let requester_ok = !requester.is_empty()
            && requester
                .trim_start_matches('-')
                .chars()
                .all(|c| c.is_ascii_digit());
        let millis_ok = !millis.is_empty() && millis.chars().all(|c| c.is_ascii_digit());
        (requester_ok && millis_ok).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn requester(&self) -> Option<ChatId> {
        self.0.rsplit_once('-')?.0.parse().ok()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A confirmed request, consumed exactly once by the pipeline.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source_url: String,
    pub title: String,
    pub duration_secs: u64,
    pub thumbnail_url: Option<String>,
    pub requester: ChatId,
    pub origin_message_id: i64,
}

/// Per-transfer resources owned by the pipeline for its lifetime.
#[derive(Debug)]
pub struct TransferHandle {
    pub id: TransferId,
    pub status: MessageRef,
    pub media_path: PathBuf,
    pub thumb_path: PathBuf,
}

impl TransferHandle {
    pub fn new(id: TransferId, status: MessageRef, download_dir: &Path) -> Self {
        Self {
            media_path: download_dir.join(format!("{id}.mp4")),
            thumb_path: download_dir.join(format!("{id}.jpg")),
            id,
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Downloading,
    Uploading,
}

/// One byte-count observation from a backend callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSample {
    pub stage: Stage,
    pub current: u64,
    /// Expected size; may be an estimate, 0 when unknown.
    pub total: u64,
}

impl ProgressSample {
    pub const fn new(stage: Stage, current: u64, total: u64) -> Self {
        Self {
            stage,
            current,
            total,
        }
    }

    pub const fn is_final(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    SlotPending,
    Downloading,
    PostDownloadCheck,
    Uploading,
    SelfDestructWait,
    Cancelled,
    Failed,
    Done,
    Cleanup,
}
