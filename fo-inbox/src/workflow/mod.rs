//! Per-file processing pipeline
//!
//! A file runs through an ordered list of [`PipelineStep`]s sharing one
//! [`ProcessingContext`]. Each step reports a tagged [`StepOutcome`]; errors
//! carry a [`FailureKind`] the error router uses to pick a destination.

pub mod error_router;
pub mod executor;
pub mod sanitize;
pub mod steps;
pub mod tags;
pub mod youtube;

pub use error_router::{ErrorRouter, RouteDestination};
pub use executor::PipelineExecutor;

use crate::config::InboxSettings;
use crate::services::id_service::FileHash;
use crate::services::record_ledger::RecordLedger;
use crate::storage::{Storage, StorageError};
use crate::types::{
    AiService, CollaboratorError, ContentExtractor, FileKind, FileRef, TranscriptSource,
};
use async_trait::async_trait;
use fo_common::events::EventBus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Pipeline steps in execution order
///
/// Ledger keys use the snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Start,
    Validate,
    Containerize,
    MoveAttachment,
    Extract,
    Cleanup,
    FetchYoutube,
    Classify,
    RecommendFolder,
    RecommendName,
    Format,
    AppendAttachment,
    Tag,
    Complete,
}

impl StepKind {
    pub const ALL: [StepKind; 14] = [
        StepKind::Start,
        StepKind::Validate,
        StepKind::Containerize,
        StepKind::MoveAttachment,
        StepKind::Extract,
        StepKind::Cleanup,
        StepKind::FetchYoutube,
        StepKind::Classify,
        StepKind::RecommendFolder,
        StepKind::RecommendName,
        StepKind::Format,
        StepKind::AppendAttachment,
        StepKind::Tag,
        StepKind::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Start => "start",
            StepKind::Validate => "validate",
            StepKind::Containerize => "containerize",
            StepKind::MoveAttachment => "move_attachment",
            StepKind::Extract => "extract",
            StepKind::Cleanup => "cleanup",
            StepKind::FetchYoutube => "fetch_youtube",
            StepKind::Classify => "classify",
            StepKind::RecommendFolder => "recommend_folder",
            StepKind::RecommendName => "recommend_name",
            StepKind::Format => "format",
            StepKind::AppendAttachment => "append_attachment",
            StepKind::Tag => "tag",
            StepKind::Complete => "complete",
        }
    }

    /// Position in the pipeline, used to break timestamp ties
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a step as recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Started,
    Completed,
    Skipped,
    Failed,
}

/// Successful step result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Precondition missing; recorded as skipped with the reason
    SkipStep(String),
    /// File disqualified; moved to the bypass folder and the run stops
    Bypass(String),
}

/// Failure category deciding where the error router sends a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Move/create/rename conflicts and I/O errors
    Storage,
    /// AI, extraction and transcript service failures
    Collaborator,
    /// A collaborator returned something the pipeline cannot act on
    Invariant,
    Unclassified,
}

/// Step failure
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepError {
    pub kind: FailureKind,
    pub message: String,
    /// Debug rendering of the underlying error chain
    pub detail: Option<String>,
}

impl StepError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Invariant, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Storage, message)
    }

    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Collaborator, message)
    }
}

impl From<StorageError> for StepError {
    fn from(err: StorageError) -> Self {
        Self {
            kind: FailureKind::Storage,
            message: err.to_string(),
            detail: Some(format!("{:?}", err)),
        }
    }
}

impl From<CollaboratorError> for StepError {
    fn from(err: CollaboratorError) -> Self {
        Self {
            kind: FailureKind::Collaborator,
            message: err.to_string(),
            detail: Some(format!("{:?}", err)),
        }
    }
}

pub type StepResult = Result<StepOutcome, StepError>;

/// Document type label with its confidence (0-100)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub label: String,
    pub confidence: u8,
}

/// Mutable state threaded through the steps of one run
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub hash: FileHash,
    /// Source file, kept current as it moves
    pub file: FileRef,
    pub kind: FileKind,
    /// Companion `.md` for media/PDF sources; the source itself for text
    pub container: Option<PathBuf>,
    /// Relocated media original
    pub attachment: Option<PathBuf>,
    pub content: String,
    /// Content before the transcript section was appended
    pub pre_transcript_content: Option<String>,
    pub classification: Option<Classification>,
    pub new_name: Option<String>,
    pub new_path: Option<PathBuf>,
    pub tags: Vec<String>,
    pub formatted: bool,
    /// Bumped on every content or location change
    pub revision: u64,
}

impl ProcessingContext {
    pub fn new(file: FileRef, hash: FileHash) -> Self {
        Self {
            hash,
            kind: file.kind(),
            file,
            container: None,
            attachment: None,
            content: String::new(),
            pre_transcript_content: None,
            classification: None,
            new_name: None,
            new_path: None,
            tags: Vec::new(),
            formatted: false,
            revision: 0,
        }
    }

    /// Whether the container is a separate file from the source
    pub fn has_distinct_container(&self) -> bool {
        self.container.as_deref().is_some_and(|c| c != self.file.path.as_path())
    }

    /// Container path, falling back to the source
    pub fn container_path(&self) -> &Path {
        self.container.as_deref().unwrap_or(&self.file.path)
    }

    /// Content without the appended transcript section
    pub fn original_content(&self) -> &str {
        self.pre_transcript_content.as_deref().unwrap_or(&self.content)
    }

    pub fn set_content(&mut self, content: String) {
        self.content = content;
        self.revision += 1;
    }

    /// Record the container's new location, following it with the source
    /// when both are the same file
    pub fn relocate_container(&mut self, new_path: PathBuf) {
        if !self.has_distinct_container() {
            self.file = self.file.relocated(new_path.clone());
        }
        self.container = Some(new_path);
        self.revision += 1;
    }
}

/// Collaborators available to every step
#[derive(Clone)]
pub struct PipelineServices {
    pub ledger: RecordLedger,
    pub storage: Arc<dyn Storage>,
    pub ai: Arc<dyn AiService>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub transcripts: Option<Arc<dyn TranscriptSource>>,
    pub settings: Arc<InboxSettings>,
    pub events: EventBus,
}

/// One unit of pipeline work
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_matches_ordinals() {
        for (i, kind) in StepKind::ALL.iter().enumerate() {
            assert_eq!(kind.ordinal(), i);
            assert_eq!(StepKind::parse(kind.as_str()), Some(*kind));
        }
        assert!(StepKind::Validate < StepKind::Cleanup);
    }

    #[test]
    fn test_step_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&StepKind::RecommendFolder).unwrap();
        assert_eq!(json, "\"recommend_folder\"");
    }

    #[test]
    fn test_storage_error_maps_to_storage_failure() {
        let err: StepError = StorageError::NotFound(PathBuf::from("a.md")).into();
        assert_eq!(err.kind, FailureKind::Storage);
        assert!(err.message.contains("a.md"));
        assert!(err.detail.is_some());
    }

    #[test]
    fn test_container_relocation_follows_text_source() {
        let hash = FileHash::parse("0123456789ab").unwrap();
        let mut ctx = ProcessingContext::new(FileRef::new("Inbox/a.md", 0, 0), hash);
        ctx.container = Some(PathBuf::from("Inbox/a.md"));
        assert!(!ctx.has_distinct_container());

        ctx.relocate_container(PathBuf::from("Notes/a.md"));
        assert_eq!(ctx.file.path, PathBuf::from("Notes/a.md"));
        assert_eq!(ctx.container_path(), Path::new("Notes/a.md"));
        assert_eq!(ctx.revision, 1);
    }

    #[test]
    fn test_original_content_excludes_transcript() {
        let hash = FileHash::parse("0123456789ab").unwrap();
        let mut ctx = ProcessingContext::new(FileRef::new("Inbox/a.md", 0, 0), hash);
        ctx.set_content("body".to_string());
        ctx.pre_transcript_content = Some("body".to_string());
        ctx.set_content("body\n\n## YouTube Video: x".to_string());
        assert_eq!(ctx.original_content(), "body");
    }
}
