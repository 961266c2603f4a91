//! Retry budgets and instruction hints derived from past attempts.
//!
//! The orchestrator asks a [`Calibrator`] how many attempts a stage gets and
//! whether the stage instruction should carry an extra hint, and reports the
//! outcome of every attempt back to it.

mod history;

pub use history::{CalibrationHistory, HistoryCalibrator, StageStats};

use crate::core::PipelineStage;
use crate::errors::FailureKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of one stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The stage produced a valid artifact.
    Succeeded,
    /// The attempt failed with the given kind.
    Failed(FailureKind),
}

/// Source of per-stage retry budgets and instruction hints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Calibrator: Send + Sync {
    /// Returns the maximum number of attempts for `stage` (at least 1).
    fn retry_budget(&self, stage: PipelineStage) -> usize;

    /// Returns an extra sentence to append to the stage instruction.
    fn instruction_hint(&self, stage: PipelineStage) -> Option<String>;

    /// Records the outcome of one attempt.
    async fn record_attempt(&self, stage: PipelineStage, outcome: AttemptOutcome);
}

/// A calibrator with a constant budget and no hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedCalibrator {
    budget: usize,
}

impl FixedCalibrator {
    /// Creates a calibrator that always grants `budget` attempts.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
        }
    }
}

#[async_trait]
impl Calibrator for FixedCalibrator {
    fn retry_budget(&self, _stage: PipelineStage) -> usize {
        self.budget
    }

    fn instruction_hint(&self, _stage: PipelineStage) -> Option<String> {
        None
    }

    async fn record_attempt(&self, _stage: PipelineStage, _outcome: AttemptOutcome) {}
}
