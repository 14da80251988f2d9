//! Inbox services
//!
//! Leaves first: file identity, the record ledger, the ingestion queue and
//! the media gate it defers to, and the inbox folder watcher.

pub mod id_service;
pub mod inbox_watcher;
pub mod ingestion_queue;
pub mod media_gate;
pub mod record_ledger;

pub use id_service::{generate_file_hash, validate_hash, FileHash};
pub use inbox_watcher::InboxWatcher;
pub use ingestion_queue::{
    Admission, IngestionQueue, QueueError, QueueHandler, QueueItem, QueueOptions, TaskOutcome,
};
pub use media_gate::{Acquire, MediaGate, MediaStats};
pub use record_ledger::{
    FileRecord, JsonFileStore, LedgerOptions, LedgerStore, LogEntry, LogError, RecordLedger,
    StatusCounts,
};
