//! Core types and collaborator trait definitions
//!
//! The pipeline consumes its external collaborators (content extraction, the
//! AI assistant, transcript lookup) only through the traits below. Concrete
//! remote implementations live outside this crate; [`PassthroughAssistant`]
//! and [`LocalTextExtractor`] let the inbox run offline.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// File references
// ============================================================================

/// Handle to a file inside the vault
///
/// `path` is relative to the vault root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: PathBuf,
    /// Last-modified time, milliseconds since the Unix epoch
    pub modified_ms: i64,
    pub size: u64,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>, modified_ms: i64, size: u64) -> Self {
        Self {
            path: path.into(),
            modified_ms,
            size,
        }
    }

    /// File name with extension
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Lowercased extension without the dot
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_extension(&self.extension())
    }

    /// Same file at a new location
    pub fn relocated(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }
}

/// Broad file category driving containerization and media throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Pdf,
    Image,
    Audio,
    Unsupported,
}

pub const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm"];

impl FileKind {
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_lowercase();
        let ext = ext.as_str();
        if TEXT_EXTENSIONS.contains(&ext) {
            FileKind::Text
        } else if ext == "pdf" {
            FileKind::Pdf
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            FileKind::Image
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            FileKind::Audio
        } else {
            FileKind::Unsupported
        }
    }

    /// Audio and image files go through the media gate
    pub fn is_media(&self) -> bool {
        matches!(self, FileKind::Image | FileKind::Audio)
    }

    /// Files whose extracted text lives in a companion `.md` container
    pub fn needs_container(&self) -> bool {
        matches!(self, FileKind::Image | FileKind::Audio | FileKind::Pdf)
    }
}

// ============================================================================
// Collaborator results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSuggestion {
    pub folder: String,
    pub is_new_folder: bool,
    pub score: f32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameSuggestion {
    pub title: String,
    pub score: f32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSuggestion {
    pub tag: String,
    pub is_new: bool,
    pub score: f32,
    pub reason: String,
}

/// Video transcript returned by a [`TranscriptSource`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub title: String,
    pub transcript: String,
}

/// Collaborator failure
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Remote call failed or returned an error status
    #[error("Service request failed: {0}")]
    Request(String),

    /// Response could not be interpreted
    #[error("Invalid service response: {0}")]
    InvalidResponse(String),

    /// The collaborator cannot handle this input
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    /// Transcript lookup failed
    #[error("YouTube error for video {video_id}: {message}")]
    YouTube { video_id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

// ============================================================================
// Collaborator traits
// ============================================================================

/// Format-aware text extraction
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Extract text from `file`; `absolute` is its resolved location on disk
    async fn extract_text(&self, file: &FileRef, absolute: &Path) -> CollaboratorResult<String>;
}

/// AI assistant operations used by the pipeline
#[async_trait]
pub trait AiService: Send + Sync {
    /// Pick one of `labels` for the document, or `None` when nothing fits
    async fn classify(
        &self,
        content: &str,
        file_name: &str,
        labels: &[String],
    ) -> CollaboratorResult<Option<String>>;

    async fn recommend_folders(
        &self,
        content: &str,
        file_name: &str,
    ) -> CollaboratorResult<Vec<FolderSuggestion>>;

    async fn recommend_names(
        &self,
        content: &str,
        file_name: &str,
    ) -> CollaboratorResult<Vec<NameSuggestion>>;

    async fn recommend_tags(
        &self,
        content: &str,
        file_path: &str,
        existing_tags: &[String],
    ) -> CollaboratorResult<Vec<TagSuggestion>>;

    /// Reformat `content` following `instructions`, streamed in chunks
    async fn format(
        &self,
        content: &str,
        instructions: &str,
    ) -> CollaboratorResult<BoxStream<'static, CollaboratorResult<String>>>;
}

/// Video transcript lookup
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch(&self, video_id: &str) -> CollaboratorResult<Transcript>;
}

// ============================================================================
// Offline implementations
// ============================================================================

/// Offline assistant
///
/// Never classifies, always recommends the default destination, keeps the
/// current name, suggests no tags and formats as identity.
#[derive(Debug, Clone)]
pub struct PassthroughAssistant {
    default_folder: String,
}

impl PassthroughAssistant {
    pub fn new(default_folder: impl Into<String>) -> Self {
        Self {
            default_folder: default_folder.into(),
        }
    }
}

#[async_trait]
impl AiService for PassthroughAssistant {
    async fn classify(
        &self,
        _content: &str,
        _file_name: &str,
        _labels: &[String],
    ) -> CollaboratorResult<Option<String>> {
        Ok(None)
    }

    async fn recommend_folders(
        &self,
        _content: &str,
        _file_name: &str,
    ) -> CollaboratorResult<Vec<FolderSuggestion>> {
        Ok(vec![FolderSuggestion {
            folder: self.default_folder.clone(),
            is_new_folder: false,
            score: 1.0,
            reason: "default destination".to_string(),
        }])
    }

    async fn recommend_names(
        &self,
        _content: &str,
        file_name: &str,
    ) -> CollaboratorResult<Vec<NameSuggestion>> {
        Ok(vec![NameSuggestion {
            title: file_name.to_string(),
            score: 1.0,
            reason: "unchanged".to_string(),
        }])
    }

    async fn recommend_tags(
        &self,
        _content: &str,
        _file_path: &str,
        _existing_tags: &[String],
    ) -> CollaboratorResult<Vec<TagSuggestion>> {
        Ok(Vec::new())
    }

    async fn format(
        &self,
        content: &str,
        _instructions: &str,
    ) -> CollaboratorResult<BoxStream<'static, CollaboratorResult<String>>> {
        Ok(stream::iter(vec![Ok(content.to_string())]).boxed())
    }
}

/// Reads markdown and plain-text files directly
///
/// Other formats need OCR, transcription or a PDF text layer and must be
/// handled by a plugged-in extractor.
#[derive(Debug, Clone, Default)]
pub struct LocalTextExtractor;

#[async_trait]
impl ContentExtractor for LocalTextExtractor {
    async fn extract_text(&self, file: &FileRef, absolute: &Path) -> CollaboratorResult<String> {
        match file.kind() {
            FileKind::Text => Ok(tokio::fs::read_to_string(absolute).await?),
            _ => Err(CollaboratorError::Unsupported(format!(
                "no local extractor for .{} files",
                file.extension()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn test_file_kind_from_extension() {
        assert_eq!(FileKind::from_extension("md"), FileKind::Text);
        assert_eq!(FileKind::from_extension("PNG"), FileKind::Image);
        assert_eq!(FileKind::from_extension("m4a"), FileKind::Audio);
        assert_eq!(FileKind::from_extension("pdf"), FileKind::Pdf);
        assert_eq!(FileKind::from_extension("exe"), FileKind::Unsupported);
        assert_eq!(FileKind::from_extension(""), FileKind::Unsupported);
    }

    #[test]
    fn test_media_and_container_kinds() {
        assert!(FileKind::Audio.is_media());
        assert!(FileKind::Image.is_media());
        assert!(!FileKind::Pdf.is_media());
        assert!(FileKind::Pdf.needs_container());
        assert!(!FileKind::Text.needs_container());
    }

    #[test]
    fn test_file_ref_name_parts() {
        let file = FileRef::new("Inbox/Meeting Notes.MD", 10, 42);
        assert_eq!(file.name(), "Meeting Notes.MD");
        assert_eq!(file.stem(), "Meeting Notes");
        assert_eq!(file.extension(), "md");
        assert_eq!(file.kind(), FileKind::Text);

        let moved = file.relocated("Processed/Meeting Notes.MD");
        assert_eq!(moved.modified_ms, 10);
        assert_eq!(moved.path, PathBuf::from("Processed/Meeting Notes.MD"));
    }

    #[tokio::test]
    async fn test_passthrough_assistant_is_identity() {
        let assistant = PassthroughAssistant::new("Processed");

        assert_eq!(assistant.classify("x", "a", &[]).await.unwrap(), None);
        let folders = assistant.recommend_folders("x", "a").await.unwrap();
        assert_eq!(folders[0].folder, "Processed");
        let names = assistant.recommend_names("x", "note").await.unwrap();
        assert_eq!(names[0].title, "note");
        assert!(assistant.recommend_tags("x", "a", &[]).await.unwrap().is_empty());

        let chunks: Vec<String> = assistant
            .format("body", "instructions")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), "body");
    }

    #[tokio::test]
    async fn test_local_extractor_rejects_media() {
        let extractor = LocalTextExtractor;
        let file = FileRef::new("Inbox/photo.png", 0, 0);
        let result = extractor.extract_text(&file, Path::new("/nonexistent/photo.png")).await;
        assert!(matches!(result, Err(CollaboratorError::Unsupported(_))));
    }
}
