//! Template build orchestration.
//!
//! One [`TemplatePipeline`] per target drives
//! ValidatingEnvironment -> AcquiringMedia -> Building -> (Validating) -> (CleaningUp) -> Completed.
//! Any failure moves straight to `Failed`; cleanup is not run on failure so
//! partial artifacts and logs stay available for post-mortem.
//!
//! The [`scheduler::BatchScheduler`] runs many pipelines in fixed-size windows.

pub mod cleanup;
pub mod executor;
pub mod preflight;
pub mod scheduler;
pub mod state;

use std::sync::Arc;
use tokio::sync::RwLock;

pub use cleanup::CleanScope;
pub use scheduler::BatchScheduler;
pub use state::{PipelinePhase, PipelineState};

use crate::config::RuntimeContext;
use crate::error::BuildError;
use crate::media::MediaAcquirer;
use crate::models::{TargetConfig, TemplateStatus};
use crate::status::StatusReporter;
use crate::system::{is_cancelled, CancelSignal};
use executor::ValidationOutcome;

/// Per-target build state machine. Owns the target's work directory for the
/// duration of the build.
#[derive(Clone)]
pub struct TemplatePipeline {
    ctx: Arc<RuntimeContext>,
    target: TargetConfig,
    media: MediaAcquirer,
    /// Shared so callers can observe the phase while `build()` runs
    state: Arc<RwLock<PipelineState>>,
    cancel_rx: CancelSignal,
}

impl TemplatePipeline {
    pub fn new(
        ctx: Arc<RuntimeContext>,
        target: TargetConfig,
        media: MediaAcquirer,
        cancel_rx: CancelSignal,
    ) -> Self {
        let state = PipelineState::new(ctx.layout.work_dir(&target.name));
        TemplatePipeline {
            ctx,
            target,
            media,
            state: Arc::new(RwLock::new(state)),
            cancel_rx,
        }
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    pub async fn current_phase(&self) -> PipelinePhase {
        self.state.read().await.phase()
    }

    pub async fn state_snapshot(&self) -> PipelineState {
        self.state.read().await.clone()
    }

    async fn transition_phase(&self, next: PipelinePhase) -> Result<(), BuildError> {
        if is_cancelled(&self.cancel_rx) {
            return Err(BuildError::Cancelled);
        }
        let mut state = self.state.write().await;
        state.transition_to(next).map_err(BuildError::InvalidTransition)?;
        log::debug!("[Pipeline] [{}] -> {}", self.target.name, next);
        Ok(())
    }

    /// Run the whole pipeline. The error, if any, is also recorded in the state.
    pub async fn build(&self) -> Result<(), BuildError> {
        let name = self.target.name.clone();
        crate::log_parsed!("[Pipeline] [{}] Starting build ({} {})", name, name, self.target.version);

        let result = self.drive().await;
        match &result {
            Ok(()) => {
                crate::log_parsed!("[Pipeline] [{}] Build completed", name);
            }
            Err(e) => {
                self.state.write().await.record_error(e.to_string());
                log::error!("[Pipeline] [{}] [FAILED] {}", name, e);
            }
        }
        result
    }

    async fn drive(&self) -> Result<(), BuildError> {
        let ctx = self.ctx.as_ref();
        let target = &self.target;
        let mut cancel = self.cancel_rx.clone();

        self.transition_phase(PipelinePhase::ValidatingEnvironment).await?;
        preflight::probe(ctx, target).await?;

        self.transition_phase(PipelinePhase::AcquiringMedia).await?;
        let media = self.media.ensure(target, &cancel).await?;

        self.transition_phase(PipelinePhase::Building).await?;
        executor::run_build(ctx, target, &media, &mut cancel).await?;

        if ctx.options.skip_validation {
            log::info!("[Pipeline] [{}] Validation skipped by options", target.name);
        } else {
            self.transition_phase(PipelinePhase::Validating).await?;
            if let ValidationOutcome::Passed(lines) = executor::validate_artifact(ctx, target, &mut cancel).await? {
                log::debug!("[Pipeline] [{}] Validator produced {} line(s)", target.name, lines.len());
            }
        }

        if ctx.options.cleanup {
            self.transition_phase(PipelinePhase::CleaningUp).await?;
            cleanup::cleanup_after_build(&ctx.layout, &target.name, &ctx.options.mode)?;
        }

        self.transition_phase(PipelinePhase::Completed).await?;
        Ok(())
    }

    /// Current status derived from the filesystem, independent of the in-memory phase.
    pub fn status(&self) -> TemplateStatus {
        StatusReporter::new(&self.ctx).status(&self.target.name)
    }
}
