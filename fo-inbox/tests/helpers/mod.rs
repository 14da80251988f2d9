//! Shared test fixtures: temporary vaults and scripted collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use fo_common::events::EventBus;
use fo_inbox::config::InboxSettings;
use fo_inbox::services::record_ledger::FileRecord;
use fo_inbox::types::{
    AiService, CollaboratorError, CollaboratorResult, ContentExtractor, FileKind, FileRef,
    FolderSuggestion, NameSuggestion, TagSuggestion, Transcript, TranscriptSource,
};
use fo_inbox::{Collaborators, Inbox};
use futures::stream::{self, BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Scripted AI assistant
// ============================================================================

/// Assistant with canned answers
pub struct ScriptedAssistant {
    /// Classification label
    pub label: Option<String>,
    /// First folder suggestion; `None` returns an empty list
    pub folder: Option<String>,
    /// Fail folder recommendation with this message
    pub folder_error: Option<String>,
    /// Crash inside folder recommendation
    pub folder_panic: bool,
    /// Suggested title; `None` keeps the current name
    pub title: Option<String>,
    pub tags: Vec<String>,
    /// Chunks streamed by `format`
    pub format_chunks: Vec<String>,
    /// Content received by each recommender call
    pub seen_content: Mutex<Vec<String>>,
}

impl Default for ScriptedAssistant {
    fn default() -> Self {
        Self {
            label: None,
            folder: Some("Notes".to_string()),
            folder_error: None,
            folder_panic: false,
            title: None,
            tags: Vec::new(),
            format_chunks: Vec::new(),
            seen_content: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AiService for ScriptedAssistant {
    async fn classify(
        &self,
        _content: &str,
        _file_name: &str,
        labels: &[String],
    ) -> CollaboratorResult<Option<String>> {
        Ok(self.label.clone().filter(|l| labels.contains(l)))
    }

    async fn recommend_folders(
        &self,
        content: &str,
        _file_name: &str,
    ) -> CollaboratorResult<Vec<FolderSuggestion>> {
        self.seen_content.lock().unwrap().push(content.to_string());
        if self.folder_panic {
            panic!("assistant crashed");
        }
        if let Some(message) = &self.folder_error {
            return Err(CollaboratorError::Request(message.clone()));
        }
        Ok(self
            .folder
            .iter()
            .map(|folder| FolderSuggestion {
                folder: folder.clone(),
                is_new_folder: false,
                score: 0.9,
                reason: "scripted".to_string(),
            })
            .collect())
    }

    async fn recommend_names(
        &self,
        _content: &str,
        file_name: &str,
    ) -> CollaboratorResult<Vec<NameSuggestion>> {
        Ok(vec![NameSuggestion {
            title: self.title.clone().unwrap_or_else(|| file_name.to_string()),
            score: 0.9,
            reason: "scripted".to_string(),
        }])
    }

    async fn recommend_tags(
        &self,
        _content: &str,
        _file_path: &str,
        _existing_tags: &[String],
    ) -> CollaboratorResult<Vec<TagSuggestion>> {
        Ok(self
            .tags
            .iter()
            .map(|tag| TagSuggestion {
                tag: tag.clone(),
                is_new: true,
                score: 0.9,
                reason: "scripted".to_string(),
            })
            .collect())
    }

    async fn format(
        &self,
        _content: &str,
        _instructions: &str,
    ) -> CollaboratorResult<BoxStream<'static, CollaboratorResult<String>>> {
        let chunks: Vec<CollaboratorResult<String>> =
            self.format_chunks.iter().cloned().map(Ok).collect();
        Ok(stream::iter(chunks).boxed())
    }
}

// ============================================================================
// Extractor and transcripts
// ============================================================================

/// Reads text directly; "transcribes" media after a delay, tracking overlap
pub struct TrackingExtractor {
    pub media_delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl TrackingExtractor {
    pub fn new(media_delay: Duration) -> Self {
        Self {
            media_delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Highest number of concurrent media extractions
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentExtractor for TrackingExtractor {
    async fn extract_text(&self, file: &FileRef, absolute: &Path) -> CollaboratorResult<String> {
        match file.kind() {
            FileKind::Text => Ok(tokio::fs::read_to_string(absolute).await?),
            FileKind::Image | FileKind::Audio | FileKind::Pdf => {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(self.media_delay).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(format!("Transcribed text for {}", file.name()))
            }
            FileKind::Unsupported => Err(CollaboratorError::Unsupported(file.name())),
        }
    }
}

pub struct FixedTranscripts;

#[async_trait]
impl TranscriptSource for FixedTranscripts {
    async fn fetch(&self, video_id: &str) -> CollaboratorResult<Transcript> {
        Ok(Transcript {
            title: format!("Demo {}", video_id),
            transcript: "hello from the transcript".to_string(),
        })
    }
}

// ============================================================================
// Vault
// ============================================================================

/// Settings tuned for fast tests
pub fn test_settings() -> InboxSettings {
    InboxSettings {
        ledger_debounce_ms: 20,
        task_timeout_ms: 10_000,
        ..InboxSettings::default()
    }
}

pub struct TestVault {
    pub dir: TempDir,
    pub inbox: Inbox,
    pub extractor: Arc<TrackingExtractor>,
    pub assistant: Arc<ScriptedAssistant>,
}

impl TestVault {
    pub async fn new(settings: InboxSettings, assistant: ScriptedAssistant) -> Self {
        Self::with_transcripts(settings, assistant, None).await
    }

    pub async fn with_transcripts(
        settings: InboxSettings,
        assistant: ScriptedAssistant,
        transcripts: Option<Arc<dyn TranscriptSource>>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let extractor = Arc::new(TrackingExtractor::new(Duration::from_millis(30)));
        let assistant = Arc::new(assistant);
        let collaborators = Collaborators {
            ai: assistant.clone(),
            extractor: extractor.clone(),
            transcripts,
        };
        let inbox = Inbox::open(dir.path(), settings, collaborators, EventBus::new(1000))
            .await
            .unwrap();
        Self {
            dir,
            inbox,
            extractor,
            assistant,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write a file into the inbox folder
    pub fn drop_file(&self, name: &str, contents: &str) {
        let path = self.path(&format!("_FileOrganizer2000/Inbox/{}", name));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative)).unwrap()
    }

    /// Queue the inbox contents and wait for every file to settle
    pub async fn process(&self) -> usize {
        let queued = self.inbox.process_backlog().await.unwrap();
        tokio::time::timeout(Duration::from_secs(20), self.inbox.wait_until_settled())
            .await
            .expect("inbox did not settle");
        queued
    }

    pub fn record_named(&self, original_name: &str) -> FileRecord {
        self.inbox
            .ledger()
            .all_records()
            .into_iter()
            .find(|r| r.original_name == original_name)
            .unwrap_or_else(|| panic!("no record for {}", original_name))
    }
}
