//! Record ledger
//!
//! Durable per-file processing history. Mutations update an in-memory map and
//! mark it dirty; a background writer coalesces bursts into one save per
//! debounce window (trailing, capped at `max_windows` windows so a constant
//! stream of mutations still reaches storage). `flush()` and `close()` give
//! callers deterministic durability.
//!
//! The map sits behind a `std::sync::Mutex` that is never held across an
//! `.await`; saves are serialized by an async mutex that also remembers the
//! last persisted generation.

use crate::services::id_service::FileHash;
use crate::types::FileRef;
use crate::workflow::{StepKind, StepPhase};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fo_common::events::{EventBus, FileStatus, InboxEvent};
use fo_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Records
// ============================================================================

/// Error captured on a failed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub step: StepKind,
}

/// Latest observation of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: StepPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LogError>,
}

impl LogEntry {
    fn new(phase: StepPhase) -> Self {
        Self {
            timestamp: Utc::now(),
            phase,
            detail: None,
            error: None,
        }
    }

    pub fn completed(&self) -> bool {
        self.phase == StepPhase::Completed
    }

    pub fn skipped(&self) -> bool {
        self.phase == StepPhase::Skipped
    }
}

/// Ledger row for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileHash,
    pub original_name: String,
    pub status: FileStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default)]
    pub formatted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default)]
    pub logs: BTreeMap<StepKind, LogEntry>,
    /// Live handle, never persisted
    #[serde(skip)]
    pub file: Option<FileRef>,
}

impl FileRecord {
    fn new(id: FileHash, original_name: &str) -> Self {
        Self {
            id,
            original_name: original_name.to_string(),
            status: FileStatus::Queued,
            tags: Vec::new(),
            classification: None,
            formatted: false,
            new_name: None,
            new_path: None,
            folder: None,
            logs: BTreeMap::new(),
            file: None,
        }
    }

    /// Most recent step, ties broken by pipeline order
    pub fn last_step(&self) -> Option<(StepKind, &LogEntry)> {
        self.logs
            .iter()
            .max_by_key(|(kind, entry)| (entry.timestamp, kind.ordinal()))
            .map(|(kind, entry)| (*kind, entry))
    }

    /// Most recent step error, ties broken by pipeline order
    pub fn last_error(&self) -> Option<&LogError> {
        self.logs
            .iter()
            .filter_map(|(kind, entry)| entry.error.as_ref().map(|e| (kind, entry, e)))
            .max_by_key(|(kind, entry, _)| (entry.timestamp, kind.ordinal()))
            .map(|(_, _, e)| e)
    }

    pub fn has_errors(&self) -> bool {
        self.status == FileStatus::Error || self.logs.values().any(|e| e.error.is_some())
    }
}

/// Record counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
    pub bypassed: usize,
}

// ============================================================================
// Persistence backend
// ============================================================================

/// Durable backing for the ledger document
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Raw document, or `None` when nothing was saved yet
    async fn load(&self) -> Result<Option<String>>;

    async fn save(&self, contents: &str) -> Result<()>;
}

/// JSON document on disk, replaced atomically (temp file + rename)
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Write-back timing
#[derive(Debug, Clone, Copy)]
pub struct LedgerOptions {
    /// Trailing debounce window
    pub debounce: Duration,
    /// Longest a burst can defer a save, in windows
    pub max_windows: u32,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            max_windows: 5,
        }
    }
}

struct LedgerState {
    records: BTreeMap<FileHash, FileRecord>,
    /// Bumped on every persisted-state mutation
    generation: u64,
}

struct LedgerInner {
    state: Mutex<LedgerState>,
    store: Arc<dyn LedgerStore>,
    /// Generation of the last successful save
    saved_generation: tokio::sync::Mutex<u64>,
    dirty: Arc<Notify>,
    shutdown: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
    events: EventBus,
}

impl LedgerInner {
    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist(&self) -> Result<()> {
        let mut saved = self.saved_generation.lock().await;
        let (generation, contents) = {
            let state = self.state();
            if state.generation == *saved {
                return Ok(());
            }
            (state.generation, serde_json::to_string_pretty(&state.records)?)
        };

        self.store.save(&contents).await?;
        *saved = generation;
        debug!(generation, "Ledger persisted");
        Ok(())
    }
}

/// Handle to the shared ledger; clones share state
#[derive(Clone)]
pub struct RecordLedger {
    inner: Arc<LedgerInner>,
}

impl RecordLedger {
    /// Load the ledger and start the background writer
    ///
    /// A missing document yields an empty ledger; an unreadable or corrupt
    /// one is logged and replaced on the next save.
    pub async fn open(store: Arc<dyn LedgerStore>, options: LedgerOptions, events: EventBus) -> Self {
        let records = match store.load().await {
            Ok(Some(raw)) => match serde_json::from_str::<BTreeMap<FileHash, FileRecord>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Ledger document is corrupt, starting empty: {}", e);
                    BTreeMap::new()
                }
            },
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Ledger document unreadable, starting empty: {}", e);
                BTreeMap::new()
            }
        };
        info!(records = records.len(), "Ledger loaded");

        let inner = Arc::new(LedgerInner {
            state: Mutex::new(LedgerState {
                records,
                generation: 0,
            }),
            store,
            saved_generation: tokio::sync::Mutex::new(0),
            dirty: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            writer: Mutex::new(None),
            events,
        });

        let handle = tokio::spawn(writer_loop(
            Arc::downgrade(&inner),
            Arc::clone(&inner.dirty),
            inner.shutdown.clone(),
            options,
        ));
        *inner.writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Self { inner }
    }

    /// Persist now, bypassing the debounce
    pub async fn flush(&self) -> Result<()> {
        self.inner.persist().await
    }

    /// Stop the writer and persist outstanding changes
    pub async fn close(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        let handle = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Ledger writer ended abnormally: {}", e);
            }
        }
        self.inner.persist().await
    }

    fn mutate<F>(&self, hash: &FileHash, f: F) -> bool
    where
        F: FnOnce(&mut FileRecord),
    {
        {
            let mut state = self.inner.state();
            let Some(record) = state.records.get_mut(hash) else {
                debug!(hash = %hash, "Ignoring mutation for untracked file");
                return false;
            };
            f(record);
            state.generation += 1;
        }
        self.inner.dirty.notify_one();
        true
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Create a `queued` record; no-op when the hash is already tracked
    pub fn start_tracking(&self, hash: &FileHash, original_name: &str) -> bool {
        {
            let mut state = self.inner.state();
            if state.records.contains_key(hash) {
                return false;
            }
            state
                .records
                .insert(hash.clone(), FileRecord::new(hash.clone(), original_name));
            state.generation += 1;
        }
        self.inner.dirty.notify_one();
        debug!(hash = %hash, name = original_name, "Tracking file");
        true
    }

    /// Change status
    ///
    /// Terminal statuses only move back to `queued` (explicit re-enqueue).
    pub fn set_status(&self, hash: &FileHash, status: FileStatus) -> bool {
        let mut changed = false;
        self.mutate(hash, |record| {
            if record.status == status {
                return;
            }
            if record.status.is_terminal() && status != FileStatus::Queued {
                warn!(
                    hash = %record.id,
                    from = %record.status,
                    to = %status,
                    "Refusing status change out of terminal state"
                );
                return;
            }
            record.status = status;
            changed = true;
        });

        if changed {
            self.inner.events.emit_lossy(InboxEvent::StatusChanged {
                hash: hash.to_string(),
                status,
                timestamp: Utc::now(),
            });
        }
        changed
    }

    pub fn start_step(&self, hash: &FileHash, step: StepKind) {
        self.mutate(hash, |record| {
            record.logs.insert(step, LogEntry::new(StepPhase::Started));
        });
    }

    /// Mark a step completed, updating its in-progress entry when present
    pub fn complete_step(&self, hash: &FileHash, step: StepKind, detail: Option<String>) {
        self.mutate(hash, |record| {
            let entry = record
                .logs
                .entry(step)
                .or_insert_with(|| LogEntry::new(StepPhase::Started));
            entry.phase = StepPhase::Completed;
            entry.timestamp = Utc::now();
            if detail.is_some() {
                entry.detail = detail;
            }
        });
    }

    pub fn skip_step(&self, hash: &FileHash, step: StepKind, reason: Option<String>) {
        self.mutate(hash, |record| {
            let mut entry = LogEntry::new(StepPhase::Skipped);
            entry.detail = reason;
            record.logs.insert(step, entry);
        });
    }

    pub fn add_error(&self, hash: &FileHash, step: StepKind, message: &str, stack: Option<String>) {
        self.mutate(hash, |record| {
            let entry = record
                .logs
                .entry(step)
                .or_insert_with(|| LogEntry::new(StepPhase::Failed));
            entry.phase = StepPhase::Failed;
            entry.timestamp = Utc::now();
            entry.error = Some(LogError {
                message: message.to_string(),
                stack,
                step,
            });
        });
    }

    pub fn set_tags(&self, hash: &FileHash, tags: Vec<String>) {
        self.mutate(hash, |record| record.tags = tags);
    }

    pub fn add_tag(&self, hash: &FileHash, tag: &str) {
        self.mutate(hash, |record| {
            if !record.tags.iter().any(|t| t == tag) {
                record.tags.push(tag.to_string());
            }
        });
    }

    pub fn set_new_name(&self, hash: &FileHash, name: &str) {
        self.mutate(hash, |record| record.new_name = Some(name.to_string()));
    }

    pub fn set_new_path(&self, hash: &FileHash, path: PathBuf) {
        self.mutate(hash, |record| record.new_path = Some(path));
    }

    pub fn set_folder(&self, hash: &FileHash, folder: &str) {
        self.mutate(hash, |record| record.folder = Some(folder.to_string()));
    }

    pub fn set_classification(&self, hash: &FileHash, label: &str) {
        self.mutate(hash, |record| record.classification = Some(label.to_string()));
    }

    pub fn set_formatted(&self, hash: &FileHash, formatted: bool) {
        self.mutate(hash, |record| record.formatted = formatted);
    }

    /// Attach the live file handle (not persisted)
    pub fn set_file(&self, hash: &FileHash, file: FileRef) {
        let mut state = self.inner.state();
        if let Some(record) = state.records.get_mut(hash) {
            record.file = Some(file);
        }
    }

    // ------------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------------

    pub fn get_record(&self, hash: &FileHash) -> Option<FileRecord> {
        self.inner.state().records.get(hash).cloned()
    }

    pub fn all_records(&self) -> Vec<FileRecord> {
        self.inner.state().records.values().cloned().collect()
    }

    pub fn records_with_errors(&self) -> Vec<FileRecord> {
        self.inner
            .state()
            .records
            .values()
            .filter(|r| r.has_errors())
            .cloned()
            .collect()
    }

    /// Records that have an entry for `step`, in any phase
    pub fn records_by_step(&self, step: StepKind) -> Vec<FileRecord> {
        self.inner
            .state()
            .records
            .values()
            .filter(|r| r.logs.contains_key(&step))
            .cloned()
            .collect()
    }

    pub fn last_error(&self, hash: &FileHash) -> Option<LogError> {
        self.inner
            .state()
            .records
            .get(hash)
            .and_then(|r| r.last_error().cloned())
    }

    pub fn last_step(&self, hash: &FileHash) -> Option<(StepKind, LogEntry)> {
        self.inner
            .state()
            .records
            .get(hash)
            .and_then(|r| r.last_step().map(|(kind, entry)| (kind, entry.clone())))
    }

    pub fn step_log(&self, hash: &FileHash, step: StepKind) -> Option<LogEntry> {
        self.inner
            .state()
            .records
            .get(hash)
            .and_then(|r| r.logs.get(&step).cloned())
    }

    /// Errors of a record in pipeline order
    pub fn step_errors(&self, hash: &FileHash) -> Vec<LogError> {
        self.inner
            .state()
            .records
            .get(hash)
            .map(|r| r.logs.values().filter_map(|e| e.error.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_errors(&self, hash: &FileHash) -> bool {
        self.inner
            .state()
            .records
            .get(hash)
            .is_some_and(FileRecord::has_errors)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let state = self.inner.state();
        let mut counts = StatusCounts::default();
        for record in state.records.values() {
            match record.status {
                FileStatus::Queued => counts.queued += 1,
                FileStatus::Processing => counts.processing += 1,
                FileStatus::Completed => counts.completed += 1,
                FileStatus::Error => counts.error += 1,
                FileStatus::Bypassed => counts.bypassed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.inner.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coalesce dirty notifications into saves
///
/// A save happens one debounce window after the last mutation, or once the
/// burst has lasted `max_windows` windows.
async fn writer_loop(
    ledger: Weak<LedgerInner>,
    dirty: Arc<Notify>,
    shutdown: CancellationToken,
    options: LedgerOptions,
) {
    loop {
        tokio::select! {
            _ = dirty.notified() => {}
            _ = shutdown.cancelled() => return,
        }

        let started = Instant::now();
        let cap = started + options.debounce * options.max_windows.max(1);
        let mut deadline = started + options.debounce;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = dirty.notified() => {
                    deadline = (Instant::now() + options.debounce).min(cap);
                }
                _ = shutdown.cancelled() => break,
            }
        }

        let Some(inner) = ledger.upgrade() else {
            return;
        };
        let result = inner.persist().await;
        drop(inner);

        if let Err(e) = result {
            error!("Failed to persist ledger, retrying: {}", e);
            // Re-arm so a quiet ledger still reaches storage once it recovers
            tokio::select! {
                _ = tokio::time::sleep(options.debounce) => dirty.notify_one(),
                _ = shutdown.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingStore {
        saves: AtomicUsize,
        last: Mutex<Option<String>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl LedgerStore for CountingStore {
        async fn load(&self) -> Result<Option<String>> {
            Ok(self.last.lock().unwrap().clone())
        }

        async fn save(&self, contents: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(fo_common::Error::Internal("disk full".to_string()));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(contents.to_string());
            Ok(())
        }
    }

    fn hash(s: &str) -> FileHash {
        FileHash::parse(s).unwrap()
    }

    fn fast() -> LedgerOptions {
        LedgerOptions {
            debounce: Duration::from_millis(50),
            max_windows: 5,
        }
    }

    #[tokio::test]
    async fn test_start_tracking_is_idempotent() {
        let ledger = RecordLedger::open(Arc::new(CountingStore::default()), fast(), EventBus::new(10)).await;
        let h = hash("aaaaaaaaaaaa");

        assert!(ledger.start_tracking(&h, "note"));
        ledger.set_status(&h, FileStatus::Processing);
        assert!(!ledger.start_tracking(&h, "note"));

        assert_eq!(ledger.get_record(&h).unwrap().status, FileStatus::Processing);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_burst_of_mutations_saves_once() {
        let store = Arc::new(CountingStore::default());
        let ledger = RecordLedger::open(store.clone(), fast(), EventBus::new(10)).await;
        let h = hash("bbbbbbbbbbbb");

        ledger.start_tracking(&h, "note");
        for step in [StepKind::Start, StepKind::Validate, StepKind::Containerize] {
            ledger.start_step(&h, step);
            ledger.complete_step(&h, step, None);
        }
        ledger.set_tags(&h, vec!["#a".to_string()]);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);

        let saved = store.last.lock().unwrap().clone().unwrap();
        let parsed: BTreeMap<FileHash, FileRecord> = serde_json::from_str(&saved).unwrap();
        let record = &parsed[&h];
        assert_eq!(record.tags, vec!["#a".to_string()]);
        assert!(record.logs[&StepKind::Containerize].completed());
    }

    #[tokio::test]
    async fn test_flush_without_changes_does_not_save() {
        let store = Arc::new(CountingStore::default());
        let ledger = RecordLedger::open(store.clone(), fast(), EventBus::new(10)).await;
        ledger.flush().await.unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);

        ledger.start_tracking(&hash("cccccccccccc"), "x");
        ledger.flush().await.unwrap();
        ledger.flush().await.unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        ledger.close().await.unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_failure_is_not_surfaced_to_mutators() {
        let store = Arc::new(CountingStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let ledger = RecordLedger::open(store.clone(), fast(), EventBus::new(10)).await;

        let h = hash("dddddddddddd");
        assert!(ledger.start_tracking(&h, "x"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(ledger.flush().await.is_err());

        store.fail.store(false, Ordering::SeqCst);
        ledger.flush().await.unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_save_is_retried_without_new_mutations() {
        let store = Arc::new(CountingStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let ledger = RecordLedger::open(store.clone(), fast(), EventBus::new(10)).await;

        let h = hash("dddddddddddf");
        assert!(ledger.start_tracking(&h, "quiet"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);

        // No further mutations and no flush: the writer must retry on its own
        store.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        let saved = store.last.lock().unwrap().clone().unwrap();
        assert!(saved.contains("quiet"));
    }

    #[tokio::test]
    async fn test_complete_updates_started_entry() {
        let ledger = RecordLedger::open(Arc::new(CountingStore::default()), fast(), EventBus::new(10)).await;
        let h = hash("eeeeeeeeeeee");
        ledger.start_tracking(&h, "x");

        ledger.start_step(&h, StepKind::Extract);
        assert_eq!(ledger.step_log(&h, StepKind::Extract).unwrap().phase, StepPhase::Started);
        ledger.complete_step(&h, StepKind::Extract, Some("ok".to_string()));

        let record = ledger.get_record(&h).unwrap();
        assert_eq!(record.logs.len(), 1);
        let entry = &record.logs[&StepKind::Extract];
        assert!(entry.completed());
        assert_eq!(entry.detail.as_deref(), Some("ok"));

        // Completion without a prior start records a new entry
        ledger.complete_step(&h, StepKind::Tag, None);
        assert!(ledger.step_log(&h, StepKind::Tag).unwrap().completed());
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky_until_requeue() {
        let events = EventBus::new(10);
        let mut rx = events.subscribe();
        let ledger = RecordLedger::open(Arc::new(CountingStore::default()), fast(), events).await;
        let h = hash("ffffffffffff");
        ledger.start_tracking(&h, "x");

        assert!(ledger.set_status(&h, FileStatus::Completed));
        assert!(!ledger.set_status(&h, FileStatus::Error));
        assert!(!ledger.set_status(&h, FileStatus::Processing));
        assert_eq!(ledger.get_record(&h).unwrap().status, FileStatus::Completed);

        assert!(ledger.set_status(&h, FileStatus::Queued));
        assert_eq!(ledger.get_record(&h).unwrap().status, FileStatus::Queued);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, InboxEvent::StatusChanged { status: FileStatus::Completed, .. }));
    }

    #[tokio::test]
    async fn test_error_projections() {
        let ledger = RecordLedger::open(Arc::new(CountingStore::default()), fast(), EventBus::new(10)).await;
        let ok = hash("111111111111");
        let bad = hash("222222222222");
        ledger.start_tracking(&ok, "ok");
        ledger.start_tracking(&bad, "bad");

        ledger.start_step(&bad, StepKind::Classify);
        ledger.add_error(&bad, StepKind::Classify, "service down", Some("trace".to_string()));
        ledger.set_status(&bad, FileStatus::Error);

        let errors = ledger.records_with_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, bad);
        assert!(ledger.has_errors(&bad));
        assert!(!ledger.has_errors(&ok));

        let last = ledger.last_error(&bad).unwrap();
        assert_eq!(last.step, StepKind::Classify);
        assert_eq!(last.message, "service down");
        assert_eq!(ledger.step_errors(&bad).len(), 1);
        assert_eq!(ledger.records_by_step(StepKind::Classify).len(), 1);

        let counts = ledger.status_counts();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.error, 1);
    }

    #[test]
    fn test_last_step_ties_break_by_pipeline_order() {
        let mut record = FileRecord::new(hash("333333333333"), "x");
        let at = Utc::now();
        for step in [StepKind::Tag, StepKind::Start, StepKind::Format] {
            record.logs.insert(
                step,
                LogEntry {
                    timestamp: at,
                    phase: StepPhase::Completed,
                    detail: None,
                    error: None,
                },
            );
        }
        assert_eq!(record.last_step().unwrap().0, StepKind::Tag);
    }

    #[tokio::test]
    async fn test_reload_resets_live_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("_FileOrganizer2000").join(".records");
        let store = Arc::new(JsonFileStore::new(&path));
        let h = hash("444444444444");

        let ledger = RecordLedger::open(store.clone(), fast(), EventBus::new(10)).await;
        ledger.start_tracking(&h, "note");
        ledger.set_file(&h, FileRef::new("Inbox/note.md", 1, 2));
        ledger.skip_step(&h, StepKind::Classify, Some("disabled".to_string()));
        assert!(ledger.get_record(&h).unwrap().file.is_some());
        ledger.close().await.unwrap();
        assert!(path.exists());

        let reloaded = RecordLedger::open(store, fast(), EventBus::new(10)).await;
        let record = reloaded.get_record(&h).unwrap();
        assert!(record.file.is_none());
        assert!(record.logs[&StepKind::Classify].skipped());
    }

    #[tokio::test]
    async fn test_corrupt_document_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".records");
        std::fs::write(&path, "{ not json").unwrap();

        let ledger = RecordLedger::open(Arc::new(JsonFileStore::new(&path)), fast(), EventBus::new(10)).await;
        assert!(ledger.is_empty());
    }
}
