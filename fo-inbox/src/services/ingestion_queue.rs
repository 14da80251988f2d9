//! Ingestion queue
//!
//! Concurrency-bounded FIFO task queue keyed by file hash. Each admitted item
//! runs the handler's `process` in its own spawned task, raced against a
//! timeout; on timeout the task is detached (not aborted) and the item is
//! counted as an error. A detached hash is not admitted again until its task
//! actually finishes. Settled items land in one of three terminal buckets
//! (completed, errors, bypassed) used for stats and duplicate detection.

use crate::services::id_service::FileHash;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fo_common::events::{EventBus, InboxEvent, QueueStats};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Queue sizing
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Maximum number of items processed at once
    pub concurrency: usize,
    /// How long the scheduler waits for one item
    pub timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Unit of work owned by the queue from admission until it settles
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub hash: FileHash,
    pub payload: T,
    pub metadata: HashMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
}

/// How a processed item settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Bypassed,
    /// Pipeline failure already routed by the handler
    Failed,
    /// Handed off elsewhere (media gate); not counted in any bucket
    Deferred,
}

/// Queue-level faults reported to `on_error`
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Queue is shutting down")]
    ShuttingDown,
}

/// Result of `add`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Hash was already pending; payload and metadata replaced in place
    Merged,
    /// Hash is currently being processed
    Rejected,
}

/// Work performed for each queued item
#[async_trait]
pub trait QueueHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn process(&self, item: QueueItem<T>) -> Result<TaskOutcome, QueueError>;

    async fn on_complete(&self, _hash: &FileHash, _outcome: TaskOutcome) {}

    async fn on_error(&self, _hash: &FileHash, _error: &QueueError) {}

    /// Work the handler still owns outside the queue, e.g. buffered items
    ///
    /// While this is true an idle queue is not reported as drained.
    fn holds_work(&self) -> bool {
        false
    }
}

struct QueueState<T> {
    pending: VecDeque<QueueItem<T>>,
    active: HashSet<FileHash>,
    /// Timed out but still running in the background
    detached: HashSet<FileHash>,
    completed: HashSet<FileHash>,
    errored: HashSet<FileHash>,
    bypassed: HashSet<FileHash>,
    /// Deferred items handed back while their previous run is still settling
    readmit: HashMap<FileHash, QueueItem<T>>,
    paused: bool,
    /// Bumped by `clear()`; settles from older epochs are ignored
    epoch: u64,
}

impl<T> QueueState<T> {
    fn stats(&self) -> QueueStats {
        let queued = self.pending.len();
        let processing = self.active.len();
        let completed = self.completed.len();
        let errors = self.errored.len();
        let bypassed = self.bypassed.len();
        QueueStats {
            queued,
            processing,
            completed,
            errors,
            bypassed,
            total: queued + processing + completed + errors + bypassed,
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    fn forget_terminal(&mut self, hash: &FileHash) {
        self.completed.remove(hash);
        self.errored.remove(hash);
        self.bypassed.remove(hash);
    }
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    handler: Arc<dyn QueueHandler<T>>,
    options: QueueOptions,
    events: EventBus,
    idle: Notify,
}

impl<T: Send + 'static> QueueInner<T> {
    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_stats(&self, stats: QueueStats) {
        self.events.emit_lossy(InboxEvent::QueueStats {
            stats,
            timestamp: Utc::now(),
        });
    }

    fn signal_drained(&self) {
        if self.handler.holds_work() {
            return;
        }
        debug!("Ingestion queue drained");
        self.events.emit_lossy(InboxEvent::QueueDrained {
            timestamp: Utc::now(),
        });
        self.idle.notify_waiters();
    }
}

/// Concurrency-bounded FIFO queue; clones share state
pub struct IngestionQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for IngestionQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> IngestionQueue<T>
where
    T: Send + 'static,
{
    pub fn new(options: QueueOptions, handler: Arc<dyn QueueHandler<T>>, events: EventBus) -> Self {
        let options = QueueOptions {
            concurrency: options.concurrency.max(1),
            ..options
        };
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    active: HashSet::new(),
                    detached: HashSet::new(),
                    completed: HashSet::new(),
                    errored: HashSet::new(),
                    bypassed: HashSet::new(),
                    readmit: HashMap::new(),
                    paused: false,
                    epoch: 0,
                }),
                handler,
                options,
                events,
                idle: Notify::new(),
            }),
        }
    }

    /// Admit an item at the tail and start work if a slot is free
    ///
    /// Terminal hashes re-enter as new work. Hashes still running, including
    /// timed-out runs that have not finished, are rejected.
    pub fn add(&self, hash: FileHash, payload: T, metadata: HashMap<String, String>) -> Admission {
        let (admission, stats) = {
            let mut state = self.inner.state();
            let admission = if state.active.contains(&hash) || state.detached.contains(&hash) {
                Admission::Rejected
            } else if let Some(existing) = state.pending.iter_mut().find(|i| i.hash == hash) {
                existing.payload = payload;
                existing.metadata = metadata;
                Admission::Merged
            } else {
                state.forget_terminal(&hash);
                state.pending.push_back(QueueItem {
                    hash: hash.clone(),
                    payload,
                    metadata,
                    enqueued_at: Utc::now(),
                });
                Admission::Queued
            };
            (admission, state.stats())
        };

        match admission {
            Admission::Queued => {
                debug!(hash = %hash, "Item queued");
                self.inner.publish_stats(stats);
                Self::pump(&self.inner);
            }
            Admission::Merged => debug!(hash = %hash, "Merged duplicate admission"),
            Admission::Rejected => debug!(hash = %hash, "Rejected admission of active item"),
        }
        admission
    }

    /// Re-admit an item that was deferred
    ///
    /// Unlike `add`, an item whose previous run has not settled yet is held
    /// and queued as soon as it does.
    pub fn readmit(&self, item: QueueItem<T>) {
        let hash = item.hash.clone();
        let stats = {
            let mut state = self.inner.state();
            if state.active.contains(&hash) || state.detached.contains(&hash) {
                state.readmit.insert(hash.clone(), item);
                None
            } else {
                state.forget_terminal(&hash);
                state.pending.retain(|i| i.hash != hash);
                state.pending.push_back(item);
                Some(state.stats())
            }
        };
        if let Some(stats) = stats {
            debug!(hash = %hash, "Deferred item readmitted");
            self.inner.publish_stats(stats);
            Self::pump(&self.inner);
        }
    }

    /// Drop a pending item; `false` if it is not pending
    pub fn remove(&self, hash: &FileHash) -> bool {
        let (removed, stats, idle) = {
            let mut state = self.inner.state();
            let before = state.pending.len();
            state.pending.retain(|i| &i.hash != hash);
            (before != state.pending.len(), state.stats(), state.is_idle())
        };
        if removed {
            self.inner.publish_stats(stats);
            if idle {
                self.inner.signal_drained();
            }
        }
        removed
    }

    /// Move a pending item straight to the bypassed bucket
    pub fn bypass(&self, hash: &FileHash, reason: &str) -> bool {
        let (bypassed, stats, idle) = {
            let mut state = self.inner.state();
            let before = state.pending.len();
            state.pending.retain(|i| &i.hash != hash);
            let bypassed = before != state.pending.len();
            if bypassed {
                state.bypassed.insert(hash.clone());
            }
            (bypassed, state.stats(), state.is_idle())
        };
        if bypassed {
            self.inner.events.emit_lossy(InboxEvent::FileBypassed {
                hash: hash.to_string(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
            self.inner.publish_stats(stats);
            if idle {
                self.inner.signal_drained();
            }
        }
        bypassed
    }

    /// Forget pending, active and terminal state without awaiting in-flight tasks
    ///
    /// Detached runs stay tracked until they finish.
    pub fn clear(&self) {
        let stats = {
            let mut state = self.inner.state();
            state.epoch += 1;
            state.pending.clear();
            state.active.clear();
            state.completed.clear();
            state.errored.clear();
            state.bypassed.clear();
            state.readmit.clear();
            state.stats()
        };
        debug!("Ingestion queue cleared");
        self.inner.publish_stats(stats);
        self.inner.signal_drained();
    }

    /// Keep admitting but stop starting new items
    pub fn pause(&self) {
        self.inner.state().paused = true;
        debug!("Ingestion queue paused");
    }

    pub fn resume(&self) {
        self.inner.state().paused = false;
        debug!("Ingestion queue resumed");
        Self::pump(&self.inner);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state().paused
    }

    pub fn get_stats(&self) -> QueueStats {
        self.inner.state().stats()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.state().is_idle()
    }

    /// Running now, or timed out and still running in the background
    pub fn is_active(&self, hash: &FileHash) -> bool {
        let state = self.inner.state();
        state.active.contains(hash) || state.detached.contains(hash)
    }

    /// Report a drain the handler was holding back, once it lets go of its work
    pub fn notify_if_drained(&self) {
        if self.inner.state().is_idle() {
            self.inner.signal_drained();
        }
    }

    /// Wait until nothing is pending, nothing is running and the handler
    /// holds no work
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() && !self.inner.handler.holds_work() {
                return;
            }
            notified.await;
        }
    }

    /// Start pending items while slots are free
    fn pump(inner: &Arc<QueueInner<T>>) {
        let started: Vec<(QueueItem<T>, u64)> = {
            let mut state = inner.state();
            let mut started = Vec::new();
            while !state.paused && state.active.len() < inner.options.concurrency {
                let Some(item) = state.pending.pop_front() else {
                    break;
                };
                state.active.insert(item.hash.clone());
                started.push((item, state.epoch));
            }
            started
        };

        for (item, epoch) in started {
            tokio::spawn(Self::run_item(Arc::clone(inner), item, epoch));
        }
    }

    async fn run_item(inner: Arc<QueueInner<T>>, item: QueueItem<T>, epoch: u64) {
        let hash = item.hash.clone();
        let timeout = inner.options.timeout;
        let handler = Arc::clone(&inner.handler);
        let mut task = tokio::spawn(async move { handler.process(item).await });

        let waited = tokio::time::timeout(timeout, &mut task).await;
        let result = match waited {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(QueueError::Panicked(e.to_string())),
            Err(_) => {
                Self::detach(&inner, &hash, task);
                Err(QueueError::Timeout(timeout))
            }
        };

        match &result {
            Ok(TaskOutcome::Deferred) => debug!(hash = %hash, "Item deferred"),
            Ok(outcome) => inner.handler.on_complete(&hash, *outcome).await,
            Err(e) => {
                warn!(hash = %hash, "Queue task failed: {}", e);
                inner.handler.on_error(&hash, e).await;
            }
        }

        Self::settle(&inner, &hash, result, epoch);
        Self::pump(&inner);

        if inner.state().is_idle() {
            inner.signal_drained();
        }
    }

    /// Track a timed-out run until its task finishes, then release any held readmission
    fn detach(inner: &Arc<QueueInner<T>>, hash: &FileHash, task: JoinHandle<Result<TaskOutcome, QueueError>>) {
        inner.state().detached.insert(hash.clone());
        let inner = Arc::clone(inner);
        let hash = hash.clone();

        tokio::spawn(async move {
            if let Err(e) = task.await {
                warn!(hash = %hash, "Detached task failed: {}", e);
            }
            let readmitted = {
                let mut state = inner.state();
                state.detached.remove(&hash);
                match state.readmit.remove(&hash) {
                    Some(item) => {
                        state.forget_terminal(&hash);
                        state.pending.push_back(item);
                        true
                    }
                    None => false,
                }
            };
            debug!(hash = %hash, "Detached task finished");
            if readmitted {
                Self::pump(&inner);
            }
        });
    }

    fn settle(inner: &Arc<QueueInner<T>>, hash: &FileHash, result: Result<TaskOutcome, QueueError>, epoch: u64) {
        let stats = {
            let mut state = inner.state();
            if state.epoch != epoch {
                debug!(hash = %hash, "Ignoring settle from before clear");
                return;
            }
            state.active.remove(hash);
            match result {
                Ok(TaskOutcome::Completed) => {
                    state.completed.insert(hash.clone());
                }
                Ok(TaskOutcome::Bypassed) => {
                    state.bypassed.insert(hash.clone());
                }
                Ok(TaskOutcome::Failed) | Err(_) => {
                    state.errored.insert(hash.clone());
                }
                Ok(TaskOutcome::Deferred) => {}
            }
            if !state.detached.contains(hash) {
                if let Some(item) = state.readmit.remove(hash) {
                    state.forget_terminal(hash);
                    state.pending.push_back(item);
                }
            }
            state.stats()
        };
        inner.publish_stats(stats);
    }
}
