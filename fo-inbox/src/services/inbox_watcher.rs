//! Inbox watcher
//!
//! Polls the inbox folder and reports files once they stop changing. A file
//! is stable when its (mtime, size) pair has not changed for the debounce
//! window; it is reported once per stable version, so a rewritten file is
//! picked up again.

use crate::storage::Storage;
use crate::types::FileRef;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Version {
    modified_ms: i64,
    size: u64,
}

impl From<&FileRef> for Version {
    fn from(file: &FileRef) -> Self {
        Self {
            modified_ms: file.modified_ms,
            size: file.size,
        }
    }
}

#[derive(Debug)]
struct Observation {
    version: Version,
    /// When this version was first seen
    since: Instant,
    reported: bool,
}

/// Stability tracker for the inbox folder
pub struct InboxWatcher {
    storage: Arc<dyn Storage>,
    inbox: PathBuf,
    poll_interval: Duration,
    debounce: Duration,
    seen: HashMap<PathBuf, Observation>,
}

impl InboxWatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        inbox: impl Into<PathBuf>,
        poll_interval: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            storage,
            inbox: inbox.into(),
            poll_interval,
            debounce,
            seen: HashMap::new(),
        }
    }

    /// Fold one listing into the tracker, returning files that became stable
    ///
    /// Files missing from the listing are forgotten.
    pub fn observe(&mut self, listing: Vec<FileRef>, now: Instant) -> Vec<FileRef> {
        let mut present = HashSet::with_capacity(listing.len());
        let mut ready = Vec::new();

        for file in listing {
            let version = Version::from(&file);
            let observation = self.seen.entry(file.path.clone()).or_insert(Observation {
                version,
                since: now,
                reported: false,
            });

            if observation.version != version {
                // Last write wins; restart the stability window
                observation.version = version;
                observation.since = now;
                observation.reported = false;
            }

            if !observation.reported && now.duration_since(observation.since) >= self.debounce {
                observation.reported = true;
                ready.push(file.clone());
            }
            present.insert(file.path);
        }

        self.seen.retain(|path, _| present.contains(path));
        ready
    }

    /// One poll: list the inbox and return newly stable files
    pub async fn poll(&mut self) -> Vec<FileRef> {
        match self.storage.list_files(&self.inbox).await {
            Ok(listing) => self.observe(listing, Instant::now()),
            Err(e) => {
                warn!(inbox = %self.inbox.display(), "Inbox listing failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Poll until cancelled, handing each non-empty batch to `on_batch`
    pub async fn run<F>(mut self, shutdown: CancellationToken, mut on_batch: F)
    where
        F: FnMut(Vec<FileRef>) + Send,
    {
        info!(
            inbox = %self.inbox.display(),
            poll_ms = self.poll_interval.as_millis() as u64,
            debounce_ms = self.debounce.as_millis() as u64,
            "Inbox watcher started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let batch = self.poll().await;
                    if !batch.is_empty() {
                        debug!(count = batch.len(), "Inbox files stable");
                        on_batch(batch);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Inbox watcher stopped");
                    return;
                }
            }
        }
    }
}
