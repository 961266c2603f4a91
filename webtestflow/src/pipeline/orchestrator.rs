//! The stage-sequencing state machine.

use super::builder::OrchestratorBuilder;
use super::retry::RetryConfig;
use crate::agents::{standard_agents, StageAgent, StageRunContext};
use crate::artifacts::{log_run_state, ArtifactInspector, ArtifactLayout, RunState, ValidatedArtifact};
use crate::calibration::{AttemptOutcome, Calibrator, HistoryCalibrator};
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::core::{PipelineStage, PipelineState};
use crate::errors::{ExecutionError, PipelineFailed, StageError, WebtestError};
use crate::events::EventSink;
use crate::executor::{ClaudeCliBackend, ExecutionPrimitive};
use crate::observability::SpanTimer;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one stage that produced a valid artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// The stage.
    pub stage: PipelineStage,
    /// Attempts used, including the successful one.
    pub attempts: usize,
    /// The artifact as re-validated by the orchestrator.
    pub artifact: ValidatedArtifact,
}

/// Outcome of a run that reached `Completed`.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// The stage execution started from, or `None` if nothing had to run.
    pub started_at: Option<PipelineStage>,
    /// Stages executed by this run, in order.
    pub executed: Vec<StageReport>,
    /// Artifact state after the run.
    pub final_state: RunState,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl PipelineReport {
    /// Returns the total number of attempts across executed stages.
    #[must_use]
    pub fn total_attempts(&self) -> usize {
        self.executed.iter().map(|s| s.attempts).sum()
    }
}

/// Sequences the five stages over one work directory.
///
/// Each stage is attempted up to its retry budget; a stage only counts as
/// done once the orchestrator itself has re-validated its artifact on disk.
/// Retries never cross stages and the first terminal failure stops the run.
///
/// Runs are serialized: a [`resume`](Self::resume) or
/// [`execute_from_step`](Self::execute_from_step) issued while another is in
/// flight waits for it to finish, then sees its artifacts.
pub struct PipelineOrchestrator {
    pub(super) inspector: ArtifactInspector,
    pub(super) agents: Vec<Arc<dyn StageAgent>>,
    pub(super) retry: RetryConfig,
    pub(super) calibrator: Option<Arc<dyn Calibrator>>,
    pub(super) event_sink: Arc<dyn EventSink>,
    pub(super) cancel: Arc<CancellationToken>,
    pub(super) state: RwLock<Option<PipelineState>>,
    pub(super) run_guard: Mutex<()>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("work_dir", &self.inspector.layout().work_dir())
            .field("retry", &self.retry)
            .field("calibrated", &self.calibrator.is_some())
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Starts building an orchestrator over `layout`.
    #[must_use]
    pub fn builder(layout: ArtifactLayout) -> OrchestratorBuilder {
        OrchestratorBuilder::new(layout)
    }

    /// Assembles the production stack described by `config`: the claude CLI
    /// backend, the five standard agents, and, if enabled, a calibrator
    /// persisted in the work directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn from_config(
        config: &PipelineConfig,
        event_sink: Arc<dyn EventSink>,
    ) -> Result<Self, WebtestError> {
        config.validate()?;
        let layout = ArtifactLayout::new(&config.work_dir);
        let cancel = Arc::new(CancellationToken::new());

        let mut backend = ClaudeCliBackend::new(&config.claude_program)
            .with_skip_permissions(config.skip_permissions);
        if let Some(model) = &config.model {
            backend = backend.with_model(model);
        }
        let primitive = Arc::new(
            ExecutionPrimitive::new(Arc::new(backend), &layout)
                .with_event_sink(Arc::clone(&event_sink))
                .with_cancellation(Arc::clone(&cancel)),
        );
        let agents = standard_agents(&layout, &primitive, &config.target_url, &config.timeouts);

        let mut builder = OrchestratorBuilder::new(layout.clone())
            .agents(agents)
            .retry(config.retry.clone())
            .event_sink(event_sink)
            .cancellation(cancel);
        if config.calibration {
            builder = builder.calibrator(Arc::new(HistoryCalibrator::load(
                layout.calibration_path(),
                config.retry.attempts(),
            )));
        }
        Ok(builder.build()?)
    }

    /// Returns the work directory layout.
    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        self.inspector.layout()
    }

    /// Returns the cancellation token of the run.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Returns the current state machine state, or `None` before the first run.
    #[must_use]
    pub fn state(&self) -> Option<PipelineState> {
        *self.state.read()
    }

    /// Derives the run state from the artifacts on disk.
    pub async fn analyze(&self) -> RunState {
        let state = self.inspector.analyze().await;
        log_run_state(&state);
        state
    }

    /// Runs from the first stage whose artifact is missing or invalid.
    ///
    /// Completes immediately if every artifact is already valid.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailed`] if a stage fails terminally.
    pub async fn resume(&self) -> Result<PipelineReport, PipelineFailed> {
        let _run = self.acquire_run().await;
        let state = self.analyze().await;
        match state.next_step {
            Some(stage) => self.execute_locked(stage).await,
            None => {
                self.set_state(PipelineState::Completed);
                self.event_sink
                    .emit(
                        "pipeline.completed",
                        Some(json!({"stages_executed": 0, "total_attempts": 0})),
                    )
                    .await;
                Ok(PipelineReport {
                    started_at: None,
                    executed: Vec::new(),
                    final_state: state,
                    duration_ms: 0.0,
                })
            }
        }
    }

    /// Runs every stage from `start` to the end, strictly in order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailed`] with the failing stage, the last error, the
    /// attempts made, and the artifact state observed after the failure.
    pub async fn execute_from_step(&self, start: PipelineStage) -> Result<PipelineReport, PipelineFailed> {
        let _run = self.acquire_run().await;
        self.execute_locked(start).await
    }

    /// Waits until no other run holds the work directory.
    async fn acquire_run(&self) -> MutexGuard<'_, ()> {
        if let Ok(guard) = self.run_guard.try_lock() {
            return guard;
        }
        info!(
            work_dir = %self.layout().work_dir().display(),
            "Waiting for the active run on this work directory"
        );
        self.run_guard.lock().await
    }

    /// Body of [`execute_from_step`](Self::execute_from_step); the caller
    /// holds the run guard.
    async fn execute_locked(&self, start: PipelineStage) -> Result<PipelineReport, PipelineFailed> {
        let timer = SpanTimer::start("pipeline");
        info!(
            start = %start,
            work_dir = %self.layout().work_dir().display(),
            "Pipeline started"
        );
        self.event_sink
            .emit(
                "pipeline.started",
                Some(json!({
                    "start": start.as_str(),
                    "work_dir": self.layout().work_dir().display().to_string(),
                })),
            )
            .await;

        let mut executed = Vec::new();
        for stage in start.from_here() {
            self.set_state(PipelineState::Running(stage));
            match self.run_stage(stage).await {
                Ok(report) => executed.push(report),
                Err((cause, attempts)) => {
                    self.set_state(PipelineState::Failed(stage));
                    let last_state = self.analyze().await;
                    let duration_ms = timer.finish();
                    warn!(
                        stage = %stage,
                        attempts,
                        kind = %cause.kind(),
                        error = %cause,
                        duration_ms,
                        "Pipeline failed"
                    );
                    self.event_sink
                        .emit(
                            "pipeline.failed",
                            Some(json!({
                                "stage": stage.as_str(),
                                "attempts": attempts,
                                "kind": cause.kind(),
                                "error": cause.to_string(),
                                "duration_ms": duration_ms,
                            })),
                        )
                        .await;
                    return Err(PipelineFailed {
                        stage,
                        cause,
                        attempts,
                        last_state,
                    });
                }
            }
        }

        self.set_state(PipelineState::Completed);
        let final_state = self.inspector.analyze().await;
        let duration_ms = timer.finish();
        let report = PipelineReport {
            started_at: Some(start),
            executed,
            final_state,
            duration_ms,
        };
        info!(
            stages = report.executed.len(),
            attempts = report.total_attempts(),
            duration_ms,
            "Pipeline completed"
        );
        self.event_sink
            .emit(
                "pipeline.completed",
                Some(json!({
                    "stages_executed": report.executed.len(),
                    "total_attempts": report.total_attempts(),
                    "duration_ms": duration_ms,
                })),
            )
            .await;
        Ok(report)
    }

    /// Attempts one stage until it succeeds, fails fatally, or runs out of budget.
    ///
    /// On failure returns the last error with the number of attempts made.
    async fn run_stage(&self, stage: PipelineStage) -> Result<StageReport, (StageError, usize)> {
        let agent = &self.agents[stage.index()];
        let budget = self
            .calibrator
            .as_ref()
            .map_or_else(|| self.retry.attempts(), |c| c.retry_budget(stage).max(1));

        info!(stage = %stage, agent = stage.agent_name(), budget, "Stage started");
        self.event_sink
            .emit(
                "stage.started",
                Some(json!({
                    "stage": stage.as_str(),
                    "agent": stage.agent_name(),
                    "budget": budget,
                })),
            )
            .await;

        let mut attempt = 0;
        loop {
            if attempt > 0 && !self.backoff(stage, attempt - 1).await {
                return Err((cancelled(stage), attempt));
            }
            if self.cancel.is_cancelled() {
                return Err((cancelled(stage), attempt));
            }
            attempt += 1;

            let timer = SpanTimer::start(stage.as_str());
            let hint = match &self.calibrator {
                Some(calibrator) if attempt > 1 => calibrator.instruction_hint(stage),
                _ => None,
            };
            let ctx = StageRunContext::new(attempt).with_hint(hint);

            let outcome = match agent.run(&ctx).await {
                // The agent's own check is not enough to advance.
                Ok(_) => self
                    .inspector
                    .validate_stage(stage)
                    .await
                    .map_err(|source| StageError::ValidationFailed { stage, source }),
                Err(error) => Err(error),
            };
            let duration_ms = timer.finish();

            match outcome {
                Ok(artifact) => {
                    self.record(stage, AttemptOutcome::Succeeded).await;
                    info!(
                        stage = %stage,
                        attempt,
                        summary = %artifact.summary,
                        duration_ms,
                        "Stage completed"
                    );
                    self.event_sink
                        .emit(
                            "stage.completed",
                            Some(json!({
                                "stage": stage.as_str(),
                                "attempts": attempt,
                                "summary": artifact.summary,
                                "path": artifact.path.display().to_string(),
                                "duration_ms": duration_ms,
                            })),
                        )
                        .await;
                    return Ok(StageReport {
                        stage,
                        attempts: attempt,
                        artifact,
                    });
                }
                Err(error) => {
                    let fatal = error.is_fatal();
                    if !fatal {
                        self.record(stage, AttemptOutcome::Failed(error.kind())).await;
                    }
                    warn!(
                        stage = %stage,
                        attempt,
                        budget,
                        kind = %error.kind(),
                        fatal,
                        error = %error,
                        "Stage attempt failed"
                    );
                    self.event_sink
                        .emit(
                            "stage.attempt_failed",
                            Some(json!({
                                "stage": stage.as_str(),
                                "attempt": attempt,
                                "budget": budget,
                                "kind": error.kind(),
                                "fatal": fatal,
                                "error": error.to_string(),
                            })),
                        )
                        .await;
                    if fatal || attempt >= budget {
                        return Err((error, attempt));
                    }
                }
            }
        }
    }

    /// Waits before retry number `retry`. Returns false if cancelled meanwhile.
    async fn backoff(&self, stage: PipelineStage, retry: usize) -> bool {
        let delay = self.retry.delay_for(retry);
        if delay.is_zero() {
            return true;
        }
        debug!(stage = %stage, delay_ms = delay.as_millis(), "Waiting before retry");
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    async fn record(&self, stage: PipelineStage, outcome: AttemptOutcome) {
        if let Some(calibrator) = &self.calibrator {
            calibrator.record_attempt(stage, outcome).await;
        }
    }

    fn set_state(&self, next: PipelineState) {
        let previous = self.state.write().replace(next);
        debug!(
            from = %previous.map_or_else(|| "idle".to_string(), |s| s.to_string()),
            to = %next,
            "Pipeline state transition"
        );
    }
}

fn cancelled(stage: PipelineStage) -> StageError {
    StageError::ExecutionFailed {
        stage,
        source: ExecutionError::Timeout {
            label: stage.as_str().to_string(),
            after_seconds: 0.0,
            cancelled: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::fixtures;

    #[test]
    fn test_report_totals() {
        let artifact = ValidatedArtifact {
            stage: PipelineStage::AnalyzeWebsite,
            path: "/w/website-analysis.json".into(),
            summary: "1 page(s)".into(),
            content: crate::artifacts::ArtifactContent::Text("{}".into()),
        };
        let report = PipelineReport {
            started_at: Some(PipelineStage::AnalyzeWebsite),
            executed: vec![
                StageReport {
                    stage: PipelineStage::AnalyzeWebsite,
                    attempts: 2,
                    artifact: artifact.clone(),
                },
                StageReport {
                    stage: PipelineStage::GenerateScenarios,
                    attempts: 1,
                    artifact,
                },
            ],
            final_state: RunState {
                next_step: Some(PipelineStage::GenerateTestCases),
                reason: String::new(),
                validated: Vec::new(),
                blocking: None,
            },
            duration_ms: 1.0,
        };
        assert_eq!(report.total_attempts(), 3);
    }

    #[test]
    fn test_cancelled_error_is_fatal() {
        let error = cancelled(PipelineStage::RunTests);
        assert!(error.is_fatal());
        assert_eq!(error.kind(), crate::errors::FailureKind::Cancelled);
    }

    #[test]
    fn test_from_config_builds_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(fixtures::FIXTURE_URL, dir.path()).with_calibration(false);
        let orchestrator =
            PipelineOrchestrator::from_config(&config, Arc::new(CollectingEventSink::new())).unwrap();

        assert_eq!(orchestrator.agents.len(), PipelineStage::ALL.len());
        assert!(orchestrator.calibrator.is_none());
        assert!(orchestrator.state().is_none());
        assert_eq!(orchestrator.layout().work_dir(), dir.path());
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let config = PipelineConfig::new("", "/w");
        let err = PipelineOrchestrator::from_config(&config, Arc::new(CollectingEventSink::new()))
            .unwrap_err();
        assert!(matches!(err, WebtestError::Config(_)));
    }
}
