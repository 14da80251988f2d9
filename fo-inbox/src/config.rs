//! Inbox pipeline settings
//!
//! Deserialized from the `[inbox]` table of the bootstrap TOML config. Every
//! field has a default, so an absent section yields a working configuration.

use crate::workflow::StepKind;
use fo_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings consumed by the queue, the media gate and the pipeline steps
///
/// Folder paths are relative to the vault root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxSettings {
    /// Watched inbox folder
    pub inbox_path: PathBuf,
    /// Where media originals land after containerization
    pub attachments_path: PathBuf,
    /// Destination for collaborator failures
    pub backup_path: PathBuf,
    /// Destination for storage failures and invariant violations
    pub error_path: PathBuf,
    /// Destination for disqualified files
    pub bypassed_path: PathBuf,
    /// Fallback folder used by the offline assistant
    pub default_destination_path: PathBuf,
    /// Folder of `.md` formatting templates; stems are classification labels
    pub templates_path: PathBuf,
    /// Ledger document location
    pub records_path: PathBuf,

    pub enable_classification: bool,
    pub enable_renaming: bool,
    pub enable_tagging: bool,
    pub enable_formatting: bool,
    pub enable_image_processing: bool,
    pub enable_audio_processing: bool,
    /// Write tags into frontmatter `tags:` instead of inline
    pub tags_in_frontmatter: bool,

    /// Estimated-token ceiling for formatting (chars / 4)
    pub max_formatting_tokens: usize,
    /// Minimum classification confidence (0-100) required to format
    pub min_format_confidence: u8,
    /// Content shorter than this (frontmatter excluded) is bypassed
    pub min_content_length: usize,
    /// Content sample size sent to the recommenders
    pub content_cutoff_chars: usize,

    /// General queue concurrency
    pub concurrency: usize,
    /// Media (audio/image) concurrency, independent of `concurrency`
    pub media_concurrency: usize,
    /// Per-task timeout in milliseconds
    pub task_timeout_ms: u64,

    /// Ledger write-back debounce window in milliseconds
    pub ledger_debounce_ms: u64,
    /// Time a file must stay unchanged before the watcher emits it
    pub watch_debounce_ms: u64,
    /// Inbox polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for InboxSettings {
    fn default() -> Self {
        Self {
            inbox_path: PathBuf::from("_FileOrganizer2000/Inbox"),
            attachments_path: PathBuf::from("_FileOrganizer2000/Processed/Attachments"),
            backup_path: PathBuf::from("_FileOrganizer2000/Backups"),
            error_path: PathBuf::from("_FileOrganizer2000/Errors"),
            bypassed_path: PathBuf::from("_FileOrganizer2000/Bypassed"),
            default_destination_path: PathBuf::from("_FileOrganizer2000/Processed"),
            templates_path: PathBuf::from("_FileOrganizer2000/Templates"),
            records_path: PathBuf::from("_FileOrganizer2000/.records"),
            enable_classification: false,
            enable_renaming: true,
            enable_tagging: true,
            enable_formatting: true,
            enable_image_processing: true,
            enable_audio_processing: true,
            tags_in_frontmatter: false,
            max_formatting_tokens: 100_000,
            min_format_confidence: 80,
            min_content_length: 5,
            content_cutoff_chars: 1000,
            concurrency: 5,
            media_concurrency: 2,
            task_timeout_ms: 30_000,
            ledger_debounce_ms: 1_000,
            watch_debounce_ms: 1_000,
            poll_interval_ms: 500,
        }
    }
}

impl InboxSettings {
    /// Build settings from the raw `[inbox]` TOML table
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        let settings: InboxSettings = toml::Value::Table(table.clone())
            .try_into()
            .map_err(|e| Error::Config(format!("Invalid [inbox] section: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the queue or the router cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.media_concurrency == 0 {
            return Err(Error::Config("media_concurrency must be at least 1".to_string()));
        }
        if self.task_timeout_ms == 0 {
            return Err(Error::Config("task_timeout_ms must be positive".to_string()));
        }
        if self.min_format_confidence > 100 {
            return Err(Error::Config(
                "min_format_confidence must be within 0-100".to_string(),
            ));
        }

        let destinations = [
            ("attachments_path", &self.attachments_path),
            ("backup_path", &self.backup_path),
            ("error_path", &self.error_path),
            ("bypassed_path", &self.bypassed_path),
            ("default_destination_path", &self.default_destination_path),
        ];
        for (name, path) in destinations {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", name)));
            }
            // Files routed into the inbox would be picked up again
            if path.starts_with(&self.inbox_path) {
                return Err(Error::Config(format!(
                    "{} ({}) must not be inside the inbox ({})",
                    name,
                    path.display(),
                    self.inbox_path.display()
                )));
            }
        }
        Ok(())
    }

    /// Whether a step is switched off by configuration
    ///
    /// Skipped steps are still written to the ledger with phase `skipped`.
    pub fn should_skip(&self, step: StepKind) -> bool {
        match step {
            StepKind::Classify => !self.enable_classification,
            StepKind::RecommendName => !self.enable_renaming,
            StepKind::Tag => !self.enable_tagging,
            StepKind::Format => !self.enable_formatting || !self.enable_classification,
            _ => false,
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn ledger_debounce(&self) -> Duration {
        Duration::from_millis(self.ledger_debounce_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Absolute ledger location under a vault root
    pub fn records_file(&self, root: &Path) -> PathBuf {
        root.join(&self.records_path)
    }

    /// Folders the inbox creates at startup
    pub fn managed_folders(&self) -> [&Path; 7] {
        [
            &self.inbox_path,
            &self.attachments_path,
            &self.backup_path,
            &self.error_path,
            &self.bypassed_path,
            &self.default_destination_path,
            &self.templates_path,
        ]
    }
}
