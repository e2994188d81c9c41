//! Pipeline State Management and Phase Tracking
//!
//! **Architecture**:
//! - `PipelinePhase`: discrete phases of one target's build
//! - `PipelineState`: current phase, work directory and the terminal error
//!
//! Phases only move forward. Optional phases (validation, cleanup) may be
//! skipped, and `Failed` is reachable from every non-terminal phase.
//! `Completed` and `Failed` are terminal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Phase of a single target pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelinePhase {
    NotStarted,
    ValidatingEnvironment,
    AcquiringMedia,
    Building,
    /// Skipped when validation is disabled.
    Validating,
    /// Skipped when cleanup is disabled.
    CleaningUp,
    Completed,
    Failed,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::NotStarted => "not_started",
            PipelinePhase::ValidatingEnvironment => "validating_environment",
            PipelinePhase::AcquiringMedia => "acquiring_media",
            PipelinePhase::Building => "building",
            PipelinePhase::Validating => "validating",
            PipelinePhase::CleaningUp => "cleaning_up",
            PipelinePhase::Completed => "completed",
            PipelinePhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelinePhase::Completed | PipelinePhase::Failed)
    }

    /// Get all valid phase transitions FROM this phase.
    pub fn valid_next_phases(&self) -> Vec<PipelinePhase> {
        use PipelinePhase::*;
        match self {
            NotStarted => vec![ValidatingEnvironment, Failed],
            ValidatingEnvironment => vec![AcquiringMedia, Failed],
            AcquiringMedia => vec![Building, Failed],
            Building => vec![Validating, CleaningUp, Completed, Failed],
            Validating => vec![CleaningUp, Completed, Failed],
            CleaningUp => vec![Completed, Failed],
            Completed | Failed => vec![],
        }
    }

    /// Check if a transition to the given phase is valid.
    pub fn can_transition_to(&self, next: PipelinePhase) -> bool {
        self.valid_next_phases().contains(&next)
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state owned by exactly one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineState {
    phase: PipelinePhase,
    work_dir: PathBuf,
    error: Option<String>,
    started_at: SystemTime,
    history: Vec<PipelinePhase>,
}

impl PipelineState {
    pub fn new(work_dir: PathBuf) -> Self {
        PipelineState {
            phase: PipelinePhase::NotStarted,
            work_dir,
            error: None,
            started_at: SystemTime::now(),
            history: vec![PipelinePhase::NotStarted],
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.work_dir
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[PipelinePhase] {
        &self.history
    }

    /// Attempt to transition to the next phase.
    pub fn transition_to(&mut self, next: PipelinePhase) -> Result<(), String> {
        if !self.phase.can_transition_to(next) {
            return Err(format!(
                "Invalid phase transition: {} -> {}",
                self.phase.as_str(),
                next.as_str()
            ));
        }
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    /// Record the terminal error and move to `Failed`.
    ///
    /// Ignored when the pipeline is already terminal, so the first error wins.
    pub fn record_error(&mut self, error: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        self.error = Some(error.into());
        self.phase = PipelinePhase::Failed;
        self.history.push(PipelinePhase::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelinePhase::*;

    #[test]
    fn test_full_forward_path() {
        let mut state = PipelineState::new(PathBuf::from("/tmp/work"));
        for next in [ValidatingEnvironment, AcquiringMedia, Building, Validating, CleaningUp, Completed] {
            state.transition_to(next).unwrap();
        }
        assert_eq!(state.phase(), Completed);
        assert_eq!(state.history().len(), 7);
    }

    #[test]
    fn test_optional_phases_can_be_skipped() {
        assert!(Building.can_transition_to(Completed));
        assert!(Building.can_transition_to(CleaningUp));
        assert!(Validating.can_transition_to(Completed));
        assert!(!AcquiringMedia.can_transition_to(Validating));
    }

    #[test]
    fn test_no_backward_or_repeated_transitions() {
        let all = [
            NotStarted,
            ValidatingEnvironment,
            AcquiringMedia,
            Building,
            Validating,
            CleaningUp,
            Completed,
            Failed,
        ];
        for from in all {
            for to in from.valid_next_phases() {
                assert!(to > from, "{} -> {} moves backwards", from, to);
            }
        }
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_phase() {
        for phase in [NotStarted, ValidatingEnvironment, AcquiringMedia, Building, Validating, CleaningUp] {
            assert!(phase.can_transition_to(Failed));
        }
        assert!(Completed.valid_next_phases().is_empty());
        assert!(Failed.valid_next_phases().is_empty());
    }

    #[test]
    fn test_first_error_wins() {
        let mut state = PipelineState::new(PathBuf::from("/tmp/work"));
        state.transition_to(ValidatingEnvironment).unwrap();
        state.record_error("packer missing");
        state.record_error("second error");
        assert_eq!(state.phase(), Failed);
        assert_eq!(state.error(), Some("packer missing"));
        assert!(state.transition_to(AcquiringMedia).is_err());
    }
}
