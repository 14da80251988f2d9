//! Inbox orchestrator
//!
//! One [`Inbox`] owns every service of a vault: storage, the record ledger,
//! the ingestion queue, the media gate and the pipeline executor. Files
//! enter through [`Inbox::enqueue_files`] (the watcher and the backlog both
//! feed it); the queue's task handler runs the pipeline and throttles media
//! through the gate.

use crate::config::InboxSettings;
use crate::services::id_service::{generate_file_hash, FileHash};
use crate::services::inbox_watcher::InboxWatcher;
use crate::services::ingestion_queue::{
    Admission, IngestionQueue, QueueError, QueueHandler, QueueItem, QueueOptions, TaskOutcome,
};
use crate::services::media_gate::{Acquire, MediaGate, MediaStats};
use crate::services::record_ledger::{
    JsonFileStore, LedgerOptions, LedgerStore, RecordLedger, StatusCounts,
};
use crate::storage::{LocalStorage, Storage};
use crate::types::{
    AiService, ContentExtractor, FileRef, LocalTextExtractor, PassthroughAssistant,
    TranscriptSource,
};
use crate::workflow::executor::PipelineOutcome;
use crate::workflow::{PipelineExecutor, PipelineServices, StepKind};
use async_trait::async_trait;
use chrono::Utc;
use fo_common::events::{EventBus, FileStatus, InboxEvent, QueueStats};
use fo_common::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outbound services the pipeline depends on
#[derive(Clone)]
pub struct Collaborators {
    pub ai: Arc<dyn AiService>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub transcripts: Option<Arc<dyn TranscriptSource>>,
}

impl Collaborators {
    /// Local-only collaborators: text extraction and the passthrough assistant
    pub fn offline(settings: &InboxSettings) -> Self {
        Self {
            ai: Arc::new(PassthroughAssistant::new(
                settings.default_destination_path.to_string_lossy(),
            )),
            extractor: Arc::new(LocalTextExtractor),
            transcripts: None,
        }
    }
}

/// Snapshot served by `GET /inbox/stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InboxStats {
    pub queue: QueueStats,
    pub media: MediaStats,
    pub records: StatusCounts,
}

struct InboxCore {
    settings: Arc<InboxSettings>,
    storage: Arc<dyn Storage>,
    ledger: RecordLedger,
    queue: IngestionQueue<FileRef>,
    media: MediaGate<QueueItem<FileRef>>,
    executor: PipelineExecutor,
    events: EventBus,
}

/// Queue handler running the pipeline for one file
struct InboxTaskHandler {
    core: Weak<InboxCore>,
}

impl InboxTaskHandler {
    /// Free a media slot and put the next deferred item back on the queue
    fn release_media(core: &InboxCore, hash: &FileHash) {
        match core.media.release(hash) {
            Some(next) => {
                debug!(released = %hash, next = %next.hash, "Readmitting deferred media item");
                core.queue.readmit(next);
            }
            // A timed-out run may be the last holder of media work
            None => core.queue.notify_if_drained(),
        }
    }

    /// Move the source of a run that died mid-pipeline into the error folder
    async fn park_in_errors(core: &InboxCore, hash: &FileHash) {
        let Some(file) = core.ledger.get_record(hash).and_then(|r| r.file) else {
            warn!(hash = %hash, "No source recorded for crashed run");
            return;
        };
        let folder = &core.settings.error_path;

        match core.storage.safe_move(&file.path, folder).await {
            Ok(moved) => {
                info!(hash = %hash, to = %moved.display(), "Crashed run parked in error folder");
                core.events.emit_lossy(InboxEvent::FileMoved {
                    hash: hash.to_string(),
                    from: file.path.display().to_string(),
                    to: moved.display().to_string(),
                    timestamp: Utc::now(),
                });
                core.ledger.set_file(hash, file.relocated(moved));
            }
            Err(e) => error!(
                hash = %hash,
                from = %file.path.display(),
                folder = %folder.display(),
                "Failed to relocate crashed file: {}",
                e
            ),
        }
    }
}

#[async_trait]
impl QueueHandler<FileRef> for InboxTaskHandler {
    async fn process(&self, item: QueueItem<FileRef>) -> std::result::Result<TaskOutcome, QueueError> {
        let core = self.core.upgrade().ok_or(QueueError::ShuttingDown)?;
        let hash = item.hash.clone();
        let is_media = item.payload.kind().is_media();

        let item = if is_media {
            match core.media.try_acquire(&hash, item) {
                Acquire::Admitted(item) => item,
                Acquire::Deferred => return Ok(TaskOutcome::Deferred),
            }
        } else {
            item
        };

        let outcome = core.executor.run(item.payload, hash.clone()).await;
        if is_media {
            Self::release_media(&core, &hash);
        }

        Ok(match outcome {
            PipelineOutcome::Completed => TaskOutcome::Completed,
            PipelineOutcome::Bypassed => TaskOutcome::Bypassed,
            PipelineOutcome::Failed => TaskOutcome::Failed,
        })
    }

    async fn on_error(&self, hash: &FileHash, error: &QueueError) {
        let Some(core) = self.core.upgrade() else {
            return;
        };

        match error {
            QueueError::Panicked(message) => {
                // The run died mid-step; record it where it stopped
                let step = core
                    .ledger
                    .last_step(hash)
                    .map(|(kind, _)| kind)
                    .unwrap_or(StepKind::Start);
                core.ledger.add_error(hash, step, message, None);
                core.ledger.set_status(hash, FileStatus::Error);
                Self::park_in_errors(&core, hash).await;
                if core.media.is_active(hash) {
                    Self::release_media(&core, hash);
                }
            }
            QueueError::Timeout(after) => {
                // The detached run keeps going and settles the record itself
                warn!(hash = %hash, after_ms = after.as_millis() as u64, "Pipeline still running after timeout");
            }
            other => error!(hash = %hash, "Queue fault: {}", other),
        }
    }

    fn holds_work(&self) -> bool {
        self.core.upgrade().is_some_and(|core| !core.media.is_empty())
    }
}

/// Vault inbox; clones share one set of services
#[derive(Clone)]
pub struct Inbox {
    core: Arc<InboxCore>,
}

impl Inbox {
    /// Open the inbox of a vault on the local filesystem
    ///
    /// Creates the managed folders and loads the ledger from
    /// `records_path`.
    pub async fn open(
        root: &Path,
        settings: InboxSettings,
        collaborators: Collaborators,
        events: EventBus,
    ) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(root));
        let store: Arc<dyn LedgerStore> = Arc::new(JsonFileStore::new(settings.records_file(root)));
        Self::with_parts(storage, store, settings, collaborators, events).await
    }

    /// Assemble an inbox from explicit parts
    pub async fn with_parts(
        storage: Arc<dyn Storage>,
        store: Arc<dyn LedgerStore>,
        settings: InboxSettings,
        collaborators: Collaborators,
        events: EventBus,
    ) -> Result<Self> {
        settings.validate()?;
        let settings = Arc::new(settings);

        for folder in settings.managed_folders() {
            storage.ensure_folder(folder).await.map_err(|e| {
                Error::Internal(format!("cannot create {}: {}", folder.display(), e))
            })?;
        }

        let ledger = RecordLedger::open(
            store,
            LedgerOptions {
                debounce: settings.ledger_debounce(),
                ..LedgerOptions::default()
            },
            events.clone(),
        )
        .await;

        let services = PipelineServices {
            ledger: ledger.clone(),
            storage: Arc::clone(&storage),
            ai: collaborators.ai,
            extractor: collaborators.extractor,
            transcripts: collaborators.transcripts,
            settings: Arc::clone(&settings),
            events: events.clone(),
        };

        let core = Arc::new_cyclic(|weak: &Weak<InboxCore>| {
            let handler: Arc<dyn QueueHandler<FileRef>> = Arc::new(InboxTaskHandler {
                core: weak.clone(),
            });
            let queue = IngestionQueue::new(
                QueueOptions {
                    concurrency: settings.concurrency,
                    timeout: settings.task_timeout(),
                },
                handler,
                events.clone(),
            );
            InboxCore {
                media: MediaGate::new(settings.media_concurrency),
                executor: PipelineExecutor::new(services),
                settings: Arc::clone(&settings),
                storage,
                ledger,
                queue,
                events,
            }
        });

        info!(
            concurrency = core.settings.concurrency,
            media_concurrency = core.settings.media_concurrency,
            records = core.ledger.len(),
            "Inbox ready"
        );
        Ok(Self { core })
    }

    /// Track and queue files; regular files go ahead of media
    ///
    /// Returns the number of files admitted or merged into pending work.
    pub fn enqueue_files(&self, files: Vec<FileRef>) -> usize {
        let core = &self.core;
        let (media, regular): (Vec<FileRef>, Vec<FileRef>) =
            files.into_iter().partition(|f| f.kind().is_media());

        let mut accepted = 0;
        for file in regular.into_iter().chain(media) {
            let hash = generate_file_hash(&file);
            let name = file.name();

            if !core.ledger.start_tracking(&hash, &name) {
                let terminal = core
                    .ledger
                    .get_record(&hash)
                    .is_some_and(|r| r.status.is_terminal());
                if terminal && !core.queue.is_active(&hash) {
                    core.ledger.set_status(&hash, FileStatus::Queued);
                }
            }
            core.ledger.set_file(&hash, file.clone());

            let mut metadata = HashMap::new();
            metadata.insert("name".to_string(), name.clone());
            metadata.insert("path".to_string(), file.path.display().to_string());

            match core.queue.add(hash.clone(), file, metadata) {
                Admission::Queued => {
                    accepted += 1;
                    core.events.emit_lossy(InboxEvent::FileQueued {
                        hash: hash.to_string(),
                        name,
                        timestamp: Utc::now(),
                    });
                }
                Admission::Merged => accepted += 1,
                Admission::Rejected => debug!(hash = %hash, "File already processing"),
            }
        }
        accepted
    }

    /// Queue every file currently in the inbox folder
    pub async fn process_backlog(&self) -> Result<usize> {
        let files = self
            .core
            .storage
            .list_files(&self.core.settings.inbox_path)
            .await
            .map_err(|e| Error::Internal(format!("cannot list inbox: {}", e)))?;
        info!(files = files.len(), "Processing inbox backlog");
        Ok(self.enqueue_files(files))
    }

    /// Wait until the queue is idle and no media item is held or buffered
    pub async fn wait_until_settled(&self) {
        self.core.queue.wait_idle().await;
    }

    pub fn stats(&self) -> InboxStats {
        InboxStats {
            queue: self.core.queue.get_stats(),
            media: self.core.media.stats(),
            records: self.core.ledger.status_counts(),
        }
    }

    /// Drop queued and buffered work; running pipelines finish on their own
    pub fn clear(&self) {
        self.core.media.clear();
        self.core.queue.clear();
    }

    pub fn pause(&self) {
        self.core.queue.pause();
    }

    pub fn resume(&self) {
        self.core.queue.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.core.queue.is_paused()
    }

    pub fn ledger(&self) -> &RecordLedger {
        &self.core.ledger
    }

    pub fn settings(&self) -> &InboxSettings {
        &self.core.settings
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.core.storage
    }

    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    /// Watcher over this vault's inbox folder
    pub fn watcher(&self) -> InboxWatcher {
        InboxWatcher::new(
            Arc::clone(&self.core.storage),
            self.core.settings.inbox_path.clone(),
            self.core.settings.poll_interval(),
            self.core.settings.watch_debounce(),
        )
    }

    /// Run the watcher in the background, feeding stable files to the queue
    pub fn spawn_watcher(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let inbox = self.clone();
        let watcher = self.watcher();
        tokio::spawn(watcher.run(shutdown, move |batch| {
            let accepted = inbox.enqueue_files(batch);
            debug!(accepted, "Watcher batch enqueued");
        }))
    }

    /// Stop starting new work and persist the ledger
    pub async fn shutdown(&self) -> Result<()> {
        self.core.queue.pause();
        self.core.ledger.close().await
    }
}
