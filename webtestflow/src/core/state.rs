//! Orchestrator state machine states.

use super::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A state of the pipeline state machine.
///
/// The five stages are the running states; `Completed` and `Failed` are
/// terminal and one-shot per `execute_from_step` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    /// The given stage is executing.
    Running(PipelineStage),
    /// Every stage from the starting point produced a valid artifact.
    Completed,
    /// The given stage exhausted its attempts or hit a fatal error.
    Failed(PipelineStage),
}

impl PipelineState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Returns the state that follows a successful run of `stage`.
    #[must_use]
    pub fn after_success(stage: PipelineStage) -> Self {
        stage.next().map_or(Self::Completed, Self::Running)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running(stage) => write!(f, "running:{stage}"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(stage) => write!(f, "failed:{stage}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_success_advances() {
        assert_eq!(
            PipelineState::after_success(PipelineStage::AnalyzeWebsite),
            PipelineState::Running(PipelineStage::GenerateScenarios)
        );
        assert_eq!(
            PipelineState::after_success(PipelineStage::AnalyzeResults),
            PipelineState::Completed
        );
    }

    #[test]
    fn test_is_terminal() {
        assert!(PipelineState::Completed.is_terminal());
        assert!(PipelineState::Failed(PipelineStage::RunTests).is_terminal());
        assert!(!PipelineState::Running(PipelineStage::RunTests).is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            PipelineState::Failed(PipelineStage::GenerateTestCases).to_string(),
            "failed:generate_test_cases"
        );
    }
}
