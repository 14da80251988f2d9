//! Pipeline executor
//!
//! Drives one file through the step list, recording every step in the
//! ledger. Steps switched off by configuration are still recorded (phase
//! `skipped`) so the audit trail always covers the full pipeline up to the
//! point where the run stopped.

use super::steps::standard_steps;
use super::{
    ErrorRouter, PipelineServices, PipelineStep, ProcessingContext, StepError, StepKind,
    StepOutcome,
};
use crate::services::id_service::FileHash;
use crate::types::FileRef;
use chrono::Utc;
use fo_common::events::{FileStatus, InboxEvent};
use tracing::{debug, info, warn};

/// Reason recorded for steps disabled in settings
pub const DISABLED_REASON: &str = "disabled by configuration";

/// How a pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Bypassed,
    Failed,
}

pub struct PipelineExecutor {
    steps: Vec<Box<dyn PipelineStep>>,
    services: PipelineServices,
    router: ErrorRouter,
}

impl PipelineExecutor {
    pub fn new(services: PipelineServices) -> Self {
        Self::with_steps(services, standard_steps())
    }

    pub fn with_steps(services: PipelineServices, steps: Vec<Box<dyn PipelineStep>>) -> Self {
        Self {
            steps,
            services,
            router: ErrorRouter::new(),
        }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    /// Run every step for one file; never returns an error
    pub async fn run(&self, file: FileRef, hash: FileHash) -> PipelineOutcome {
        let ledger = &self.services.ledger;
        ledger.set_status(&hash, FileStatus::Processing);
        let mut ctx = ProcessingContext::new(file, hash.clone());

        for step in &self.steps {
            let kind = step.kind();

            if self.services.settings.should_skip(kind) {
                debug!(hash = %hash, step = %kind, "Step disabled");
                ledger.skip_step(&hash, kind, Some(DISABLED_REASON.to_string()));
                continue;
            }

            ledger.start_step(&hash, kind);
            match step.run(&mut ctx, &self.services).await {
                Ok(StepOutcome::Continue) => ledger.complete_step(&hash, kind, None),
                Ok(StepOutcome::SkipStep(reason)) => {
                    debug!(hash = %hash, step = %kind, reason = %reason, "Step skipped");
                    ledger.skip_step(&hash, kind, Some(reason));
                }
                Ok(StepOutcome::Bypass(reason)) => {
                    ledger.complete_step(&hash, kind, Some(reason.clone()));
                    return self.bypass(&mut ctx, kind, &reason).await;
                }
                Err(err) => {
                    self.fail(&mut ctx, kind, err).await;
                    return PipelineOutcome::Failed;
                }
            }
        }

        ledger.set_status(&hash, FileStatus::Completed);
        let path = ctx.container_path().display().to_string();
        info!(hash = %hash, path = %path, "File processed");
        self.services.events.emit_lossy(InboxEvent::FileCompleted {
            hash: hash.to_string(),
            path,
            timestamp: Utc::now(),
        });
        PipelineOutcome::Completed
    }

    async fn fail(&self, ctx: &mut ProcessingContext, step: StepKind, err: StepError) {
        warn!(hash = %ctx.hash, step = %step, kind = ?err.kind, "Step failed: {}", err);
        self.services
            .ledger
            .add_error(&ctx.hash, step, &err.message, err.detail.clone());
        self.services.events.emit_lossy(InboxEvent::FileFailed {
            hash: ctx.hash.to_string(),
            step: step.to_string(),
            message: err.message.clone(),
            timestamp: Utc::now(),
        });
        self.router.route(ctx, step, err.kind, &self.services).await;
    }

    /// Park a disqualified file (and its companion note) in the bypass folder
    async fn bypass(&self, ctx: &mut ProcessingContext, step: StepKind, reason: &str) -> PipelineOutcome {
        let storage = &self.services.storage;
        let folder = &self.services.settings.bypassed_path;
        let container = ctx
            .has_distinct_container()
            .then(|| ctx.container_path().to_path_buf());

        let source = ctx.file.path.clone();
        match storage.safe_move(&source, folder).await {
            Ok(moved) => ctx.file = ctx.file.relocated(moved),
            Err(e) => {
                self.fail(ctx, step, e.into()).await;
                return PipelineOutcome::Failed;
            }
        }
        if let Some(container) = container {
            match storage.safe_move(&container, folder).await {
                Ok(moved) => ctx.container = Some(moved),
                Err(e) => {
                    self.fail(ctx, step, e.into()).await;
                    return PipelineOutcome::Failed;
                }
            }
        }

        self.services.ledger.set_status(&ctx.hash, FileStatus::Bypassed);
        info!(hash = %ctx.hash, step = %step, reason = %reason, "File bypassed");
        self.services.events.emit_lossy(InboxEvent::FileBypassed {
            hash: ctx.hash.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        PipelineOutcome::Bypassed
    }
}
