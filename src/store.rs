//! User moderation state persisted as a JSON document.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::messenger::ChatId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read user store {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("user store {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not write user store {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not serialize user store: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub banned: bool,
    pub joined_at: DateTime<Utc>,
}

impl UserRecord {
    fn new() -> Self {
        Self {
            banned: false,
            joined_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts the user if unknown and returns the stored record.
    async fn register(&self, user: ChatId) -> Result<UserRecord, StoreError>;

    async fn get(&self, user: ChatId) -> Result<Option<UserRecord>, StoreError>;

    /// Also creates the record, so a ban can precede the user's first visit.
    async fn set_banned(&self, user: ChatId, banned: bool) -> Result<(), StoreError>;

    async fn bot_active(&self) -> Result<bool, StoreError>;

    async fn set_bot_active(&self, active: bool) -> Result<(), StoreError>;
}

const fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default = "default_active")]
    bot_active: bool,
    #[serde(default)]
    users: BTreeMap<ChatId, UserRecord>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            bot_active: true,
            users: BTreeMap::new(),
        }
    }
}

/// [`UserStore`] backed by one JSON file, rewritten on every change. Memory
/// only changes once the write has landed.
pub struct JsonUserStore {
    path: PathBuf,
    document: Mutex<StoreDocument>,
}

impl JsonUserStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let document = load_document(&path).await?;
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub async fn user_count(&self) -> usize {
        self.document.lock().await.users.len()
    }
}

async fn load_document(path: &Path) -> Result<StoreDocument, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(StoreDocument::default()),
        Err(source) => Err(StoreError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes through a sibling temp file so a crash never leaves half a document.
async fn persist_document(path: &Path, document: &StoreDocument) -> Result<(), StoreError> {
    let payload = serde_json::to_string_pretty(document)?;
    let staging = path.with_extension("json.tmp");
    let write_error = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    tokio::fs::write(&staging, payload).await.map_err(write_error)?;
    tokio::fs::rename(&staging, path).await.map_err(write_error)
}

#[async_trait]
impl UserStore for JsonUserStore {
    async fn register(&self, user: ChatId) -> Result<UserRecord, StoreError> {
        let mut document = self.document.lock().await;
        if let Some(existing) = document.users.get(&user) {
            return Ok(existing.clone());
        }

        let record = UserRecord::new();
        let mut next = document.clone();
        next.users.insert(user, record.clone());
        persist_document(&self.path, &next).await?;
        *document = next;
        Ok(record)
    }

    async fn get(&self, user: ChatId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.document.lock().await.users.get(&user).cloned())
    }

    async fn set_banned(&self, user: ChatId, banned: bool) -> Result<(), StoreError> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        next.users.entry(user).or_insert_with(UserRecord::new).banned = banned;
        persist_document(&self.path, &next).await?;
        *document = next;
        Ok(())
    }

    async fn bot_active(&self) -> Result<bool, StoreError> {
        Ok(self.document.lock().await.bot_active)
    }

    async fn set_bot_active(&self, active: bool) -> Result<(), StoreError> {
        let mut document = self.document.lock().await;
        let next = StoreDocument {
            bot_active: active,
            ..document.clone()
        };
        persist_document(&self.path, &next).await?;
        *document = next;
        Ok(())
    }
}
