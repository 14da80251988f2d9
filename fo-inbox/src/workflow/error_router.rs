//! Failure routing
//!
//! A failed file is marked `error` and moved out of the way. Collaborator
//! failures go to the backup folder with their content untouched; storage
//! failures and invariant violations go to the error folder.

use super::{FailureKind, PipelineServices, ProcessingContext, StepKind};
use chrono::Utc;
use fo_common::events::{FileStatus, InboxEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Folder a failed file is moved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteDestination {
    Backup,
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRouter;

impl ErrorRouter {
    pub fn new() -> Self {
        Self
    }

    /// Destination for a failure of `kind` raised by `step`
    pub fn destination(step: StepKind, kind: FailureKind) -> RouteDestination {
        match kind {
            FailureKind::Collaborator => RouteDestination::Backup,
            FailureKind::Storage | FailureKind::Invariant => RouteDestination::Error,
            FailureKind::Unclassified => match step {
                StepKind::MoveAttachment | StepKind::RecommendFolder => RouteDestination::Error,
                StepKind::Classify | StepKind::Tag | StepKind::FetchYoutube => {
                    RouteDestination::Backup
                }
                _ => RouteDestination::Error,
            },
        }
    }

    /// Mark the record `error` and relocate the source and its container
    ///
    /// Move failures are logged; the record keeps its step error either way.
    pub async fn route(
        &self,
        ctx: &mut ProcessingContext,
        step: StepKind,
        kind: FailureKind,
        services: &PipelineServices,
    ) -> RouteDestination {
        services.ledger.set_status(&ctx.hash, FileStatus::Error);

        let destination = Self::destination(step, kind);
        let folder = match destination {
            RouteDestination::Backup => &services.settings.backup_path,
            RouteDestination::Error => &services.settings.error_path,
        };
        info!(
            hash = %ctx.hash,
            step = %step,
            kind = ?kind,
            destination = ?destination,
            "Routing failed file"
        );

        let container = ctx
            .has_distinct_container()
            .then(|| ctx.container_path().to_path_buf());

        let source = ctx.file.path.clone();
        if let Some(moved) = Self::relocate(ctx, &source, folder, services).await {
            ctx.file = ctx.file.relocated(moved);
        }
        if let Some(container) = container {
            if let Some(moved) = Self::relocate(ctx, &container, folder, services).await {
                ctx.container = Some(moved);
            }
        }
        destination
    }

    async fn relocate(
        ctx: &ProcessingContext,
        from: &Path,
        folder: &Path,
        services: &PipelineServices,
    ) -> Option<PathBuf> {
        match services.storage.safe_move(from, folder).await {
            Ok(moved) => {
                services.events.emit_lossy(InboxEvent::FileMoved {
                    hash: ctx.hash.to_string(),
                    from: from.display().to_string(),
                    to: moved.display().to_string(),
                    timestamp: Utc::now(),
                });
                Some(moved)
            }
            Err(e) => {
                error!(
                    hash = %ctx.hash,
                    from = %from.display(),
                    folder = %folder.display(),
                    "Failed to relocate failed file: {}",
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_takes_precedence_over_step() {
        assert_eq!(
            ErrorRouter::destination(StepKind::RecommendFolder, FailureKind::Collaborator),
            RouteDestination::Backup
        );
        assert_eq!(
            ErrorRouter::destination(StepKind::Classify, FailureKind::Storage),
            RouteDestination::Error
        );
        assert_eq!(
            ErrorRouter::destination(StepKind::RecommendFolder, FailureKind::Invariant),
            RouteDestination::Error
        );
    }

    #[test]
    fn test_unclassified_failures_route_by_step() {
        let route = |step| ErrorRouter::destination(step, FailureKind::Unclassified);
        assert_eq!(route(StepKind::MoveAttachment), RouteDestination::Error);
        assert_eq!(route(StepKind::RecommendFolder), RouteDestination::Error);
        assert_eq!(route(StepKind::Classify), RouteDestination::Backup);
        assert_eq!(route(StepKind::Tag), RouteDestination::Backup);
        assert_eq!(route(StepKind::FetchYoutube), RouteDestination::Backup);
        assert_eq!(route(StepKind::Format), RouteDestination::Error);
        assert_eq!(route(StepKind::Extract), RouteDestination::Error);
    }
}
