//! History-driven calibration persisted across runs.

use super::{AttemptOutcome, Calibrator};
use crate::artifacts::{ArtifactSpec, SCHEMA_VERSION};
use crate::core::PipelineStage;
use crate::errors::{FailureKind, WebtestError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Attempts recorded before the history influences budgets or hints.
const MIN_SAMPLES: u64 = 3;

/// Upper bound on any calibrated budget.
const MAX_BUDGET: usize = 6;

/// Per-stage attempt counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    /// Attempts recorded.
    pub attempts: u64,
    /// Attempts that produced a valid artifact.
    pub successes: u64,
    /// Attempts whose output never appeared on disk.
    pub side_effect_misses: u64,
    /// Attempts whose output failed validation.
    pub validation_misses: u64,
    /// Attempts abandoned after their time budget.
    pub timeouts: u64,
    /// Attempts the backend failed.
    pub backend_failures: u64,
}

impl StageStats {
    /// Returns the success rate, or `None` without enough samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts >= MIN_SAMPLES).then(|| self.successes as f64 / self.attempts as f64)
    }

    fn record(&mut self, outcome: AttemptOutcome) {
        self.attempts += 1;
        match outcome {
            AttemptOutcome::Succeeded => self.successes += 1,
            AttemptOutcome::Failed(FailureKind::SideEffectNotConfirmed) => {
                self.side_effect_misses += 1;
            }
            AttemptOutcome::Failed(FailureKind::ValidationFailed) => self.validation_misses += 1,
            AttemptOutcome::Failed(FailureKind::Timeout) => self.timeouts += 1,
            AttemptOutcome::Failed(FailureKind::BackendFailure) => self.backend_failures += 1,
            AttemptOutcome::Failed(FailureKind::InvalidInput | FailureKind::Cancelled) => {}
        }
    }
}

/// The persisted calibration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationHistory {
    /// Format version.
    pub schema_version: u32,
    /// When the history was last written.
    pub updated_at: DateTime<Utc>,
    /// Counters per stage.
    #[serde(default)]
    pub stages: BTreeMap<PipelineStage, StageStats>,
}

impl Default for CalibrationHistory {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            updated_at: Utc::now(),
            stages: BTreeMap::new(),
        }
    }
}

/// A [`Calibrator`] that adapts to recorded outcomes.
///
/// The budget starts at `base` and grows by one when a stage's success rate
/// drops below 70% and by two below 40%, never exceeding [`MAX_BUDGET`]
/// (or `base`, if larger). With a `path`, every recorded attempt is written
/// back to disk.
#[derive(Debug)]
pub struct HistoryCalibrator {
    base: usize,
    path: Option<PathBuf>,
    history: RwLock<CalibrationHistory>,
    write_lock: Mutex<()>,
}

impl HistoryCalibrator {
    /// Creates an in-memory calibrator.
    #[must_use]
    pub fn new(base: usize) -> Self {
        Self {
            base: base.max(1),
            path: None,
            history: RwLock::new(CalibrationHistory::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Loads history from `path`, starting empty if the file is missing or
    /// unreadable. Later updates are written back to `path`.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>, base: usize) -> Self {
        let path = path.into();
        let history = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<CalibrationHistory>(&text) {
                Ok(history) if history.schema_version == SCHEMA_VERSION => history,
                Ok(history) => {
                    warn!(
                        path = %path.display(),
                        found = history.schema_version,
                        "Ignoring calibration history with unsupported schema version"
                    );
                    CalibrationHistory::default()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable calibration history");
                    CalibrationHistory::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CalibrationHistory::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read calibration history");
                CalibrationHistory::default()
            }
        };
        Self {
            base: base.max(1),
            path: Some(path),
            history: RwLock::new(history),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the counters of a stage.
    #[must_use]
    pub fn stats(&self, stage: PipelineStage) -> StageStats {
        self.history
            .read()
            .stages
            .get(&stage)
            .copied()
            .unwrap_or_default()
    }

    /// Returns a copy of the full history.
    #[must_use]
    pub fn snapshot(&self) -> CalibrationHistory {
        self.history.read().clone()
    }

    /// Writes the history to its file, if it has one.
    ///
    /// Concurrent writers are serialized; each writes the history as it is
    /// when its turn comes, so the file never goes back to an older state.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub async fn persist(&self) -> Result<(), WebtestError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _write = self.write_lock.lock().await;
        let text = serde_json::to_string_pretty(&*self.history.read())
            .map_err(|e| WebtestError::Serialization(e.to_string()))?;
        write_atomically(path, &text).await?;
        debug!(path = %path.display(), "Persisted calibration history");
        Ok(())
    }
}

async fn write_atomically(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(tmp, path).await
}

#[async_trait]
impl Calibrator for HistoryCalibrator {
    fn retry_budget(&self, stage: PipelineStage) -> usize {
        let extra = match self.stats(stage).success_rate() {
            Some(rate) if rate < 0.4 => 2,
            Some(rate) if rate < 0.7 => 1,
            _ => 0,
        };
        (self.base + extra).min(MAX_BUDGET.max(self.base))
    }

    fn instruction_hint(&self, stage: PipelineStage) -> Option<String> {
        let stats = self.stats(stage);
        if stats.attempts < MIN_SAMPLES {
            return None;
        }
        let artifact = ArtifactSpec::for_stage(stage).relative();
        if stats.side_effect_misses > 0 && stats.side_effect_misses >= stats.validation_misses {
            Some(format!(
                "Earlier attempts at this step finished without saving {artifact}. \
                 Use the Write tool to create it on disk before you reply; describing the content is not enough."
            ))
        } else if stats.validation_misses > 0 {
            Some(format!(
                "Earlier attempts at this step saved {artifact} with the wrong structure. \
                 Follow the required format exactly, including every required field."
            ))
        } else {
            None
        }
    }

    async fn record_attempt(&self, stage: PipelineStage, outcome: AttemptOutcome) {
        {
            let mut history = self.history.write();
            history.stages.entry(stage).or_default().record(outcome);
            history.updated_at = Utc::now();
        }
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Could not persist calibration history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn record_n(calibrator: &HistoryCalibrator, stage: PipelineStage, outcome: AttemptOutcome, n: usize) {
        for _ in 0..n {
            calibrator.record_attempt(stage, outcome).await;
        }
    }

    #[test]
    fn test_budget_without_history_is_base() {
        let calibrator = HistoryCalibrator::new(3);
        assert_eq!(calibrator.retry_budget(PipelineStage::AnalyzeWebsite), 3);
        assert!(calibrator.instruction_hint(PipelineStage::AnalyzeWebsite).is_none());
    }

    #[tokio::test]
    async fn test_budget_grows_with_failure_rate() {
        let calibrator = HistoryCalibrator::new(3);
        let stage = PipelineStage::GenerateTestCases;

        record_n(&calibrator, stage, AttemptOutcome::Succeeded, 1).await;
        record_n(&calibrator, stage, AttemptOutcome::Failed(FailureKind::ValidationFailed), 1).await;
        record_n(&calibrator, stage, AttemptOutcome::Succeeded, 1).await;
        // 2 of 3 succeeded: below 70%
        assert_eq!(calibrator.retry_budget(stage), 4);

        record_n(&calibrator, stage, AttemptOutcome::Failed(FailureKind::Timeout), 3).await;
        // 2 of 6 succeeded: below 40%
        assert_eq!(calibrator.retry_budget(stage), 5);
    }

    #[tokio::test]
    async fn test_budget_is_capped() {
        let calibrator = HistoryCalibrator::new(5);
        record_n(
            &calibrator,
            PipelineStage::RunTests,
            AttemptOutcome::Failed(FailureKind::BackendFailure),
            5,
        ).await;
        assert_eq!(calibrator.retry_budget(PipelineStage::RunTests), MAX_BUDGET);
    }

    #[tokio::test]
    async fn test_hint_emphasizes_write_when_side_effects_missing() {
        let calibrator = HistoryCalibrator::new(3);
        let stage = PipelineStage::AnalyzeResults;
        record_n(&calibrator, stage, AttemptOutcome::Failed(FailureKind::SideEffectNotConfirmed), 2).await;
        record_n(&calibrator, stage, AttemptOutcome::Failed(FailureKind::ValidationFailed), 1).await;

        let hint = calibrator.instruction_hint(stage).unwrap();
        assert!(hint.contains("Write tool"));
        assert!(hint.contains("test-report.md"));
    }

    #[tokio::test]
    async fn test_hint_emphasizes_structure_when_validation_fails() {
        let calibrator = HistoryCalibrator::new(3);
        let stage = PipelineStage::GenerateScenarios;
        record_n(&calibrator, stage, AttemptOutcome::Failed(FailureKind::ValidationFailed), 3).await;

        let hint = calibrator.instruction_hint(stage).unwrap();
        assert!(hint.contains("wrong structure"));
    }

    #[tokio::test]
    async fn test_history_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".webtestflow/calibration.json");

        let first = HistoryCalibrator::load(&path, 3);
        first
            .record_attempt(PipelineStage::RunTests, AttemptOutcome::Succeeded)
            .await;
        first
            .record_attempt(
                PipelineStage::RunTests,
                AttemptOutcome::Failed(FailureKind::Timeout),
            )
            .await;
        assert!(!path.with_extension("json.tmp").exists());

        let second = HistoryCalibrator::load(&path, 3);
        assert_eq!(
            second.stats(PipelineStage::RunTests),
            StageStats {
                attempts: 2,
                successes: 1,
                timeouts: 1,
                ..StageStats::default()
            }
        );
    }

    #[test]
    fn test_corrupt_history_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(&path, "{not json").unwrap();

        let calibrator = HistoryCalibrator::load(&path, 2);
        assert_eq!(calibrator.snapshot().stages.len(), 0);
        assert_eq!(calibrator.retry_budget(PipelineStage::AnalyzeWebsite), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_records_keep_the_latest_history_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let calibrator = std::sync::Arc::new(HistoryCalibrator::load(&path, 3));

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let calibrator = std::sync::Arc::clone(&calibrator);
                tokio::spawn(async move {
                    calibrator
                        .record_attempt(PipelineStage::AnalyzeWebsite, AttemptOutcome::Succeeded)
                        .await;
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let reloaded = HistoryCalibrator::load(&path, 3);
        assert_eq!(reloaded.stats(PipelineStage::AnalyzeWebsite).attempts, 8);
        assert_eq!(reloaded.snapshot(), calibrator.snapshot());
    }
}
