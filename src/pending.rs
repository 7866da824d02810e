//! Resolved links waiting for the user's confirmation.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::messenger::ChatId;

pub const PENDING_TTL_SECONDS: i64 = 30 * 60;
pub const MAX_PENDING_LINKS: usize = 5_000;

/// A resolved link shown to the user with confirm/cancel buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub url: String,
    pub title: String,
    pub duration_secs: u64,
    pub thumbnail_url: Option<String>,
    pub requester: ChatId,
    pub origin_message_id: i64,
    pub created_at: DateTime<Utc>,
}

pub fn pending_key(user: ChatId, message_id: i64) -> String {
    format!("{user}:{message_id}")
}

#[derive(Debug)]
pub struct PendingLinks {
    entries: Mutex<HashMap<String, PendingLink>>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for PendingLinks {
    fn default() -> Self {
        Self::new(Duration::seconds(PENDING_TTL_SECONDS), MAX_PENDING_LINKS)
    }
}

impl PendingLinks {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub async fn insert(&self, key: String, link: PendingLink) {
        let mut entries = self.entries.lock().await;
        prune_expired(&mut entries, Utc::now(), self.ttl);
        entries.insert(key, link);
        trim_oldest(&mut entries, self.max_entries);
    }

    /// Removes and returns the entry; expired entries count as missing.
    pub async fn take(&self, key: &str) -> Option<PendingLink> {
        let link = self.entries.lock().await.remove(key)?;
        (Utc::now() - link.created_at <= self.ttl).then_some(link)
    }

    pub async fn discard(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

fn prune_expired(entries: &mut HashMap<String, PendingLink>, now: DateTime<Utc>, ttl: Duration) {
    entries.retain(|_, link| now - link.created_at <= ttl);
}

fn trim_oldest(entries: &mut HashMap<String, PendingLink>, max_entries: usize) {
    if entries.len() <= max_entries {
        return;
    }

    let overflow = entries.len() - max_entries;
    let mut oldest = entries
        .iter()
        .map(|(key, link)| (key.clone(), link.created_at))
        .collect::<Vec<_>>();
    oldest.sort_by_key(|(_, created_at)| *created_at);

    for (key, _) in oldest.into_iter().take(overflow) {
        entries.remove(&key);
    }
}
