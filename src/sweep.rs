//! Startup removal of files left behind by a previous run.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

pub const STALE_FILE_SECONDS: u64 = 2 * 60 * 60;

/// Deletes entries of `dir` not modified for `older_than`. Returns how many
/// were removed; a zero age disables the sweep.
pub async fn remove_stale_files(dir: &Path, older_than: Duration) -> usize {
    if older_than.is_zero() {
        return 0;
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open {dir:?} for cleanup: {error}");
            }
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not list {dir:?} for cleanup: {error}");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Could not read metadata of {path:?}: {error}");
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove stale {path:?}: {error}"),
        }
    }

    if removed > 0 {
        info!("Removed {removed} stale entries from {dir:?}");
    }
    removed
}
