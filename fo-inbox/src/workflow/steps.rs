//! Pipeline step implementations
//!
//! Steps run strictly in [`StepKind`] order for one file. A step either
//! mutates the [`ProcessingContext`] and continues, soft-skips with a reason,
//! disqualifies the file (bypass) or fails with a categorized [`StepError`].

use super::sanitize::{body_length, sanitize_content, truncate_chars};
use super::tags::{add_frontmatter_tag, has_tag, inline_tag_suffix, normalize_tag};
use super::youtube::{extract_video_id, transcript_section};
use super::{
    Classification, PipelineServices, PipelineStep, ProcessingContext, StepError, StepKind,
    StepOutcome, StepResult,
};
use crate::storage::{sanitize_file_stem, StorageError};
use crate::types::FileKind;
use async_trait::async_trait;
use chrono::Utc;
use fo_common::events::InboxEvent;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Confidence recorded for a label returned by the classifier
const CLASSIFIER_CONFIDENCE: u8 = 100;

/// The full pipeline in execution order
pub fn standard_steps() -> Vec<Box<dyn PipelineStep>> {
    vec![
        Box::new(StartStep),
        Box::new(ValidateStep),
        Box::new(ContainerizeStep),
        Box::new(MoveAttachmentStep),
        Box::new(ExtractStep),
        Box::new(CleanupStep),
        Box::new(FetchYoutubeStep),
        Box::new(ClassifyStep),
        Box::new(RecommendFolderStep),
        Box::new(RecommendNameStep),
        Box::new(FormatStep),
        Box::new(AppendAttachmentStep),
        Box::new(TagStep),
        Box::new(CompleteStep),
    ]
}

fn emit_moved(services: &PipelineServices, ctx: &ProcessingContext, from: &Path, to: &Path) {
    services.events.emit_lossy(InboxEvent::FileMoved {
        hash: ctx.hash.to_string(),
        from: from.display().to_string(),
        to: to.display().to_string(),
        timestamp: Utc::now(),
    });
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Template names (markdown stems in the templates folder), sorted
async fn template_names(services: &PipelineServices) -> Result<Vec<String>, StepError> {
    let files = services
        .storage
        .list_files(&services.settings.templates_path)
        .await?;
    let mut names: Vec<String> = files
        .iter()
        .filter(|f| f.extension() == "md")
        .map(|f| f.stem())
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

// ============================================================================
// Intake
// ============================================================================

pub struct StartStep;

#[async_trait]
impl PipelineStep for StartStep {
    fn kind(&self) -> StepKind {
        StepKind::Start
    }

    async fn run(&self, ctx: &mut ProcessingContext, _services: &PipelineServices) -> StepResult {
        info!(hash = %ctx.hash, file = %ctx.file.path.display(), "Processing file");
        Ok(StepOutcome::Continue)
    }
}

/// Disqualifies unsupported and disabled file types
pub struct ValidateStep;

#[async_trait]
impl PipelineStep for ValidateStep {
    fn kind(&self) -> StepKind {
        StepKind::Validate
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        if !services.storage.exists(&ctx.file.path).await {
            return Err(StorageError::NotFound(ctx.file.path.clone()).into());
        }

        let settings = &services.settings;
        let outcome = match ctx.kind {
            FileKind::Unsupported => {
                StepOutcome::Bypass(format!("unsupported file type: .{}", ctx.file.extension()))
            }
            FileKind::Image if !settings.enable_image_processing => {
                StepOutcome::Bypass("image processing is disabled".to_string())
            }
            FileKind::Audio if !settings.enable_audio_processing => {
                StepOutcome::Bypass("audio processing is disabled".to_string())
            }
            _ => StepOutcome::Continue,
        };
        Ok(outcome)
    }
}

/// Gives media and PDF files a companion markdown note
pub struct ContainerizeStep;

#[async_trait]
impl PipelineStep for ContainerizeStep {
    fn kind(&self) -> StepKind {
        StepKind::Containerize
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        if !ctx.kind.needs_container() {
            ctx.container = Some(ctx.file.path.clone());
            return Ok(StepOutcome::Continue);
        }

        let desired = PathBuf::from(format!("{}.md", ctx.file.stem()));
        let created = services.storage.safe_create(&desired, "").await?;
        debug!(hash = %ctx.hash, container = %created.display(), "Container created");
        ctx.container = Some(created);
        ctx.revision += 1;
        Ok(StepOutcome::Continue)
    }
}

/// Moves a containerized original into the attachments folder
pub struct MoveAttachmentStep;

#[async_trait]
impl PipelineStep for MoveAttachmentStep {
    fn kind(&self) -> StepKind {
        StepKind::MoveAttachment
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        if !ctx.has_distinct_container() {
            return Ok(StepOutcome::SkipStep("no companion note".to_string()));
        }

        let from = ctx.file.path.clone();
        let moved = services
            .storage
            .safe_move(&from, &services.settings.attachments_path)
            .await?;
        emit_moved(services, ctx, &from, &moved);

        ctx.file = ctx.file.relocated(moved.clone());
        ctx.attachment = Some(moved);
        Ok(StepOutcome::Continue)
    }
}

// ============================================================================
// Content
// ============================================================================

pub struct ExtractStep;

#[async_trait]
impl PipelineStep for ExtractStep {
    fn kind(&self) -> StepKind {
        StepKind::Extract
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let absolute = services.storage.absolute(&ctx.file.path)?;
        let text = services.extractor.extract_text(&ctx.file, &absolute).await?;

        if ctx.has_distinct_container() {
            services.storage.write(ctx.container_path(), &text).await?;
        }
        debug!(hash = %ctx.hash, chars = text.chars().count(), "Content extracted");
        ctx.set_content(text);
        Ok(StepOutcome::Continue)
    }
}

/// Sanitizes content and disqualifies near-empty documents
pub struct CleanupStep;

#[async_trait]
impl PipelineStep for CleanupStep {
    fn kind(&self) -> StepKind {
        StepKind::Cleanup
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let cleaned = sanitize_content(&ctx.content);

        let min = services.settings.min_content_length;
        let length = body_length(&cleaned);
        if length < min {
            return Ok(StepOutcome::Bypass(format!(
                "content too short ({} < {} characters)",
                length, min
            )));
        }

        if cleaned != ctx.content {
            services.storage.write(ctx.container_path(), &cleaned).await?;
            ctx.set_content(cleaned);
        }
        Ok(StepOutcome::Continue)
    }
}

/// Appends the transcript of a linked YouTube video
pub struct FetchYoutubeStep;

#[async_trait]
impl PipelineStep for FetchYoutubeStep {
    fn kind(&self) -> StepKind {
        StepKind::FetchYoutube
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let Some(source) = &services.transcripts else {
            return Ok(StepOutcome::SkipStep("no transcript source configured".to_string()));
        };
        let Some(video_id) = extract_video_id(&ctx.content) else {
            return Ok(StepOutcome::SkipStep("no YouTube link found".to_string()));
        };

        let transcript = source.fetch(&video_id).await?;
        let section = transcript_section(&transcript.title, &transcript.transcript);
        services.storage.append(ctx.container_path(), &section).await?;

        let original = ctx.content.clone();
        ctx.set_content(format!("{}{}", original, section));
        ctx.pre_transcript_content = Some(original);
        info!(hash = %ctx.hash, video_id = %video_id, "Transcript appended");
        Ok(StepOutcome::Continue)
    }
}

// ============================================================================
// AI enrichment
// ============================================================================

/// Picks a formatting template for the document
pub struct ClassifyStep;

#[async_trait]
impl PipelineStep for ClassifyStep {
    fn kind(&self) -> StepKind {
        StepKind::Classify
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let labels = template_names(services).await?;
        let label = services
            .ai
            .classify(ctx.original_content(), &ctx.file.name(), &labels)
            .await?;

        match label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) {
            Some(label) => {
                debug!(hash = %ctx.hash, label = %label, "Document classified");
                services.ledger.set_classification(&ctx.hash, &label);
                ctx.classification = Some(Classification {
                    label,
                    confidence: CLASSIFIER_CONFIDENCE,
                });
            }
            None => debug!(hash = %ctx.hash, "No matching template"),
        }
        Ok(StepOutcome::Continue)
    }
}

pub struct RecommendFolderStep;

#[async_trait]
impl PipelineStep for RecommendFolderStep {
    fn kind(&self) -> StepKind {
        StepKind::RecommendFolder
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let sample = truncate_chars(ctx.original_content(), services.settings.content_cutoff_chars);
        let container_name = file_stem(ctx.container_path());
        let suggestions = services.ai.recommend_folders(sample, &container_name).await?;

        let folder = suggestions
            .first()
            .map(|s| s.folder.trim().trim_matches('/').to_string())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| StepError::invariant("folder recommender returned no suggestions"))?;

        let from = ctx.container_path().to_path_buf();
        let moved = services.storage.safe_move(&from, Path::new(&folder)).await?;
        emit_moved(services, ctx, &from, &moved);

        services.ledger.set_folder(&ctx.hash, &folder);
        services.ledger.set_new_path(&ctx.hash, moved.clone());
        ctx.new_path = Some(moved.clone());
        ctx.relocate_container(moved);
        Ok(StepOutcome::Continue)
    }
}

pub struct RecommendNameStep;

#[async_trait]
impl PipelineStep for RecommendNameStep {
    fn kind(&self) -> StepKind {
        StepKind::RecommendName
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let sample = truncate_chars(ctx.original_content(), services.settings.content_cutoff_chars);
        let current = file_stem(ctx.container_path());
        let suggestions = services.ai.recommend_names(sample, &current).await?;

        let Some(suggestion) = suggestions.first() else {
            return Ok(StepOutcome::SkipStep("no name suggestions".to_string()));
        };
        let title = sanitize_file_stem(&suggestion.title);
        if title.is_empty() || title == current {
            return Ok(StepOutcome::Continue);
        }

        let from = ctx.container_path().to_path_buf();
        let renamed = services.storage.safe_rename(&from, &title).await?;
        let new_name = file_stem(&renamed);

        services.events.emit_lossy(InboxEvent::FileRenamed {
            hash: ctx.hash.to_string(),
            from: from.display().to_string(),
            to: renamed.display().to_string(),
            timestamp: Utc::now(),
        });
        services.ledger.set_new_name(&ctx.hash, &new_name);
        services.ledger.set_new_path(&ctx.hash, renamed.clone());
        ctx.new_name = Some(new_name);
        ctx.new_path = Some(renamed.clone());
        ctx.relocate_container(renamed);
        Ok(StepOutcome::Continue)
    }
}

/// Rewrites the document following its template's instructions
pub struct FormatStep;

#[async_trait]
impl PipelineStep for FormatStep {
    fn kind(&self) -> StepKind {
        StepKind::Format
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let settings = &services.settings;
        let Some(classification) = ctx.classification.clone() else {
            return Ok(StepOutcome::SkipStep("document is not classified".to_string()));
        };
        if classification.confidence < settings.min_format_confidence {
            return Ok(StepOutcome::SkipStep(format!(
                "classification confidence {} below {}",
                classification.confidence, settings.min_format_confidence
            )));
        }

        let estimated_tokens = ctx.content.chars().count() / 4;
        if estimated_tokens > settings.max_formatting_tokens {
            return Ok(StepOutcome::SkipStep(format!(
                "content too long to format (~{} tokens)",
                estimated_tokens
            )));
        }

        let template = settings
            .templates_path
            .join(format!("{}.md", classification.label));
        let instructions = match services.storage.read_to_string(&template).await {
            Ok(text) => text,
            Err(StorageError::NotFound(_)) => {
                return Ok(StepOutcome::SkipStep(format!(
                    "no template for {}",
                    classification.label
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if instructions.trim().is_empty() {
            return Ok(StepOutcome::SkipStep("template has no instructions".to_string()));
        }

        let container = ctx.container_path().to_path_buf();
        let mut chunks = services
            .ai
            .format(ctx.original_content(), &instructions)
            .await?;

        services.storage.write(&container, "").await?;
        let mut formatted = String::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    services.storage.append(&container, &chunk).await?;
                    formatted.push_str(&chunk);
                }
                Err(e) => {
                    // Put the unformatted document back before routing
                    services.storage.write(&container, &ctx.content).await?;
                    return Err(e.into());
                }
            }
        }

        services.ledger.set_formatted(&ctx.hash, true);
        ctx.formatted = true;
        ctx.pre_transcript_content = None;
        ctx.set_content(formatted);
        Ok(StepOutcome::Continue)
    }
}

/// Links the relocated original from its companion note
pub struct AppendAttachmentStep;

#[async_trait]
impl PipelineStep for AppendAttachmentStep {
    fn kind(&self) -> StepKind {
        StepKind::AppendAttachment
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let Some(name) = ctx
            .attachment
            .as_deref()
            .and_then(|a| a.file_name())
            .map(|n| n.to_string_lossy().into_owned())
        else {
            return Ok(StepOutcome::SkipStep("no attachment".to_string()));
        };

        let link = format!("\n\n![[{}]]", name);
        services.storage.append(ctx.container_path(), &link).await?;
        let content = format!("{}{}", ctx.content, link);
        ctx.set_content(content);
        Ok(StepOutcome::Continue)
    }
}

pub struct TagStep;

#[async_trait]
impl PipelineStep for TagStep {
    fn kind(&self) -> StepKind {
        StepKind::Tag
    }

    async fn run(&self, ctx: &mut ProcessingContext, services: &PipelineServices) -> StepResult {
        let existing = services.storage.existing_tags().await?;
        let container = ctx.container_path().to_path_buf();
        let suggestions = services
            .ai
            .recommend_tags(
                ctx.original_content(),
                &container.display().to_string(),
                &existing,
            )
            .await?;

        let mut content = ctx.content.clone();
        let mut applied: Vec<String> = Vec::new();
        for suggestion in suggestions {
            let Some(tag) = normalize_tag(&suggestion.tag) else {
                continue;
            };
            if applied.contains(&tag) || has_tag(&content, &tag) {
                continue;
            }
            if services.settings.tags_in_frontmatter {
                content = add_frontmatter_tag(&content, &tag);
            } else {
                let suffix = inline_tag_suffix(&content, &tag);
                content.push_str(&suffix);
            }
            applied.push(tag);
        }

        if applied.is_empty() {
            return Ok(StepOutcome::Continue);
        }

        services.storage.write(&container, &content).await?;
        debug!(hash = %ctx.hash, tags = ?applied, "Tags applied");
        services.ledger.set_tags(&ctx.hash, applied.clone());
        ctx.tags = applied;
        ctx.set_content(content);
        Ok(StepOutcome::Continue)
    }
}

/// End marker; the executor records the terminal status
pub struct CompleteStep;

#[async_trait]
impl PipelineStep for CompleteStep {
    fn kind(&self) -> StepKind {
        StepKind::Complete
    }

    async fn run(&self, _ctx: &mut ProcessingContext, _services: &PipelineServices) -> StepResult {
        Ok(StepOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_steps_follow_pipeline_order() {
        let kinds: Vec<StepKind> = standard_steps().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, StepKind::ALL.to_vec());
    }

    #[test]
    fn test_file_stem_of_container() {
        assert_eq!(file_stem(Path::new("Processed/Meeting 1.md")), "Meeting 1");
        assert_eq!(file_stem(Path::new("")), "");
    }
}
