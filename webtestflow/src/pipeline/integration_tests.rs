//! End-to-end tests for pipeline orchestration over a scripted backend.

#[cfg(test)]
mod tests {
    use crate::agents::{standard_agents, StageAgent, StageRunContext};
    use crate::artifacts::{ArtifactContent, ArtifactLayout, ValidatedArtifact};
    use crate::calibration::{AttemptOutcome, MockCalibrator};
    use crate::cancellation::CancellationToken;
    use crate::config::StageTimeouts;
    use crate::core::{PipelineStage, PipelineState};
    use crate::errors::{FailureKind, StageError};
    use crate::events::CollectingEventSink;
    use crate::executor::ExecutionPrimitive;
    use crate::pipeline::{BackoffStrategy, JitterStrategy, OrchestratorBuilder, RetryConfig};
    use crate::testing::{fixtures, ScriptedBackend, ScriptedTurn};
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        dir: tempfile::TempDir,
        layout: ArtifactLayout,
        backend: Arc<ScriptedBackend>,
        sink: Arc<CollectingEventSink>,
        cancel: Arc<CancellationToken>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = ArtifactLayout::new(dir.path());
            Self {
                dir,
                layout,
                backend: Arc::new(ScriptedBackend::new()),
                sink: Arc::new(CollectingEventSink::new()),
                cancel: Arc::new(CancellationToken::new()),
            }
        }

        fn builder(&self, retry: RetryConfig) -> OrchestratorBuilder {
            let primitive = Arc::new(
                ExecutionPrimitive::new(self.backend.clone(), &self.layout)
                    .with_event_sink(self.sink.clone())
                    .with_cancellation(Arc::clone(&self.cancel)),
            );
            let agents = standard_agents(
                &self.layout,
                &primitive,
                fixtures::FIXTURE_URL,
                &StageTimeouts::uniform(Duration::from_secs(5)),
            );
            OrchestratorBuilder::new(self.layout.clone())
                .agents(agents)
                .retry(retry)
                .event_sink(self.sink.clone())
                .cancellation(Arc::clone(&self.cancel))
        }

        fn lifecycle_events(&self) -> Vec<String> {
            self.sink
                .event_types()
                .into_iter()
                .filter(|t| t != "execution.transcript")
                .collect()
        }
    }

    /// Claims success without writing anything.
    struct LyingAgent;

    #[async_trait]
    impl StageAgent for LyingAgent {
        fn stage(&self) -> PipelineStage {
            PipelineStage::AnalyzeWebsite
        }

        async fn run(&self, _ctx: &StageRunContext) -> Result<ValidatedArtifact, StageError> {
            Ok(ValidatedArtifact {
                stage: PipelineStage::AnalyzeWebsite,
                path: "website-analysis.json".into(),
                summary: "3 page(s)".into(),
                content: ArtifactContent::Text("{}".into()),
            })
        }
    }

    struct CountingAgent {
        stage: PipelineStage,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StageAgent for CountingAgent {
        fn stage(&self) -> PipelineStage {
            self.stage
        }

        async fn run(&self, _ctx: &StageRunContext) -> Result<ValidatedArtifact, StageError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Err(StageError::ValidationFailed {
                stage: self.stage,
                source: crate::errors::ArtifactInvalid::Missing {
                    path: "unused".into(),
                },
            })
        }
    }

    #[tokio::test]
    async fn test_full_run_from_empty_directory() {
        let h = Harness::new();
        for stage in PipelineStage::ALL {
            h.backend.push(fixtures::successful_turn(stage));
        }
        let orchestrator = h.builder(RetryConfig::immediate(3)).build().unwrap();

        let report = orchestrator.resume().await.unwrap();

        assert_eq!(report.started_at, Some(PipelineStage::AnalyzeWebsite));
        assert_eq!(report.executed.len(), 5);
        assert_eq!(report.total_attempts(), 5);
        assert!(report.final_state.is_complete());
        assert_eq!(report.final_state.completed_stages(), PipelineStage::ALL.to_vec());
        assert_eq!(orchestrator.state(), Some(PipelineState::Completed));
        assert_eq!(h.backend.call_count(), 5);
        assert!(h.dir.path().join("test-report.md").is_file());
    }

    #[tokio::test]
    async fn test_overlapping_resumes_do_not_run_a_stage_twice() {
        let h = Harness::new();
        h.backend.push(
            fixtures::successful_turn(PipelineStage::AnalyzeWebsite).delay(Duration::from_millis(50)),
        );
        for stage in &PipelineStage::ALL[1..] {
            h.backend.push(fixtures::successful_turn(*stage));
        }
        let orchestrator = h.builder(RetryConfig::immediate(1)).build().unwrap();

        let (first, second) = tokio::join!(orchestrator.resume(), orchestrator.resume());

        let mut executed = vec![first.unwrap().executed.len(), second.unwrap().executed.len()];
        executed.sort_unstable();
        assert_eq!(executed, vec![0, 5]);
        assert_eq!(h.backend.call_count(), 5);
        assert_eq!(h.backend.remaining(), 0);
        assert_eq!(h.sink.events_of_type("pipeline.started").len(), 1);
    }

    #[tokio::test]
    async fn test_resume_at_scenarios_fails_when_test_cases_never_land() {
        let h = Harness::new();
        fixtures::write_valid_artifact(&h.layout, PipelineStage::AnalyzeWebsite).unwrap();
        h.backend.push(fixtures::successful_turn(PipelineStage::GenerateScenarios));
        for _ in 0..3 {
            h.backend.push(fixtures::hollow_turn(PipelineStage::GenerateTestCases));
        }
        let orchestrator = h.builder(RetryConfig::immediate(3)).build().unwrap();

        let failed = orchestrator.resume().await.unwrap_err();

        assert_eq!(failed.stage, PipelineStage::GenerateTestCases);
        assert_eq!(failed.error_kind(), FailureKind::SideEffectNotConfirmed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.last_state.next_step, Some(PipelineStage::GenerateTestCases));
        assert_eq!(
            failed.last_state.completed_stages(),
            vec![PipelineStage::AnalyzeWebsite, PipelineStage::GenerateScenarios]
        );
        assert_eq!(
            orchestrator.state(),
            Some(PipelineState::Failed(PipelineStage::GenerateTestCases))
        );
        assert_eq!(h.backend.call_count(), 4);
        assert!(h.dir.path().join("test-scenarios.json").is_file());
    }

    #[tokio::test]
    async fn test_never_advances_past_invalid_artifact() {
        let h = Harness::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let orchestrator = h
            .builder(RetryConfig::immediate(2))
            .agent(Arc::new(LyingAgent))
            .agent(Arc::new(CountingAgent {
                stage: PipelineStage::GenerateScenarios,
                runs: Arc::clone(&runs),
            }))
            .build()
            .unwrap();

        let failed = orchestrator
            .execute_from_step(PipelineStage::AnalyzeWebsite)
            .await
            .unwrap_err();

        assert_eq!(failed.stage, PipelineStage::AnalyzeWebsite);
        assert_eq!(failed.error_kind(), FailureKind::ValidationFailed);
        assert_eq!(failed.attempts, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_input_is_fatal() {
        let h = Harness::new();
        let orchestrator = h.builder(RetryConfig::immediate(3)).build().unwrap();

        let failed = orchestrator
            .execute_from_step(PipelineStage::RunTests)
            .await
            .unwrap_err();

        assert_eq!(failed.stage, PipelineStage::RunTests);
        assert_eq!(failed.error_kind(), FailureKind::InvalidInput);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_state.next_step, Some(PipelineStage::AnalyzeWebsite));
        assert_eq!(h.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_uses_calibrated_budget_and_hint() {
        let h = Harness::new();
        let stage = PipelineStage::AnalyzeResults;
        fixtures::write_valid_prefix(&h.layout, stage).unwrap();
        h.backend.push(fixtures::invalid_turn(stage));
        h.backend.push(fixtures::successful_turn(stage));

        let mut calibrator = MockCalibrator::new();
        calibrator
            .expect_retry_budget()
            .with(eq(stage))
            .return_const(2usize);
        calibrator
            .expect_instruction_hint()
            .with(eq(stage))
            .times(1)
            .returning(|_| Some("Save the report with the Write tool.".to_string()));
        calibrator
            .expect_record_attempt()
            .with(eq(stage), eq(AttemptOutcome::Failed(FailureKind::ValidationFailed)))
            .times(1)
            .return_const(());
        calibrator
            .expect_record_attempt()
            .with(eq(stage), eq(AttemptOutcome::Succeeded))
            .times(1)
            .return_const(());

        let orchestrator = h
            .builder(RetryConfig::immediate(1))
            .calibrator(Arc::new(calibrator))
            .build()
            .unwrap();
        let report = orchestrator.execute_from_step(stage).await.unwrap();

        assert_eq!(report.executed.len(), 1);
        assert_eq!(report.executed[0].attempts, 2);
        let requests = h.backend.requests();
        assert_eq!(requests.len(), 2);
        // The hint only strengthens retries.
        assert!(!requests[0].instruction.contains("Note:"));
        assert!(requests[1]
            .instruction
            .contains("Note: Save the report with the Write tool."));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_reports_last_error() {
        let h = Harness::new();
        h.backend.push(fixtures::error_turn("rate limited"));
        h.backend.push(fixtures::invalid_turn(PipelineStage::AnalyzeWebsite));
        let orchestrator = h.builder(RetryConfig::immediate(2)).build().unwrap();

        let failed = orchestrator.resume().await.unwrap_err();

        assert_eq!(failed.attempts, 2);
        assert_eq!(failed.error_kind(), FailureKind::ValidationFailed);
        assert_eq!(
            h.sink
                .events_of_type("stage.attempt_failed")
                .iter()
                .map(|(_, data)| data.as_ref().unwrap()["kind"].clone())
                .collect::<Vec<_>>(),
            vec![
                serde_json::json!("backend_failure"),
                serde_json::json!("validation_failed")
            ]
        );
    }

    #[tokio::test]
    async fn test_lifecycle_event_order() {
        let h = Harness::new();
        let stage = PipelineStage::AnalyzeResults;
        fixtures::write_valid_prefix(&h.layout, stage).unwrap();
        h.backend.push(fixtures::error_turn("overloaded"));
        h.backend.push(fixtures::successful_turn(stage));
        let orchestrator = h.builder(RetryConfig::immediate(2)).build().unwrap();

        orchestrator.resume().await.unwrap();

        assert_eq!(
            h.lifecycle_events(),
            vec![
                "pipeline.started",
                "stage.started",
                "stage.attempt_failed",
                "stage.completed",
                "pipeline.completed",
            ]
        );
        assert!(!h.sink.events_of_type("execution.transcript").is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_abandons_in_flight_call() {
        let h = Harness::new();
        h.backend.push(
            fixtures::successful_turn(PipelineStage::AnalyzeWebsite).delay(Duration::from_secs(30)),
        );
        let orchestrator = h.builder(RetryConfig::immediate(3)).build().unwrap();

        let cancel = Arc::clone(&h.cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel("operator abort");
        });
        let failed = orchestrator.resume().await.unwrap_err();

        assert_eq!(failed.error_kind(), FailureKind::Cancelled);
        assert_eq!(failed.attempts, 1);
        assert_eq!(h.backend.call_count(), 1);
        assert!(!h.dir.path().join("website-analysis.json").exists());
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff() {
        let h = Harness::new();
        h.backend.push(fixtures::error_turn("overloaded"));
        let retry = RetryConfig::new()
            .with_base_delay_ms(30_000)
            .with_backoff(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::None);
        let orchestrator = h.builder(retry).build().unwrap();

        let cancel = Arc::clone(&h.cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel("shutdown");
        });
        let failed = orchestrator.resume().await.unwrap_err();

        assert_eq!(failed.error_kind(), FailureKind::Cancelled);
        assert_eq!(failed.attempts, 1);
        assert_eq!(h.backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let h = Harness::new();
        h.cancel.cancel("not today");
        let orchestrator = h.builder(RetryConfig::immediate(3)).build().unwrap();

        let failed = orchestrator.resume().await.unwrap_err();

        assert_eq!(failed.error_kind(), FailureKind::Cancelled);
        assert_eq!(failed.attempts, 0);
        assert_eq!(h.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_analyze_is_idempotent() {
        let h = Harness::new();
        fixtures::write_valid_prefix(&h.layout, PipelineStage::RunTests).unwrap();
        fixtures::write_valid_artifact(&h.layout, PipelineStage::AnalyzeResults).unwrap();
        let orchestrator = h.builder(RetryConfig::default()).build().unwrap();

        let first = orchestrator.analyze().await;
        let second = orchestrator.analyze().await;

        assert_eq!(first, second);
        assert_eq!(first.next_step, Some(PipelineStage::RunTests));
        assert_eq!(first.validated.len(), 3);
        assert!(orchestrator.state().is_none());
    }

    #[tokio::test]
    async fn test_resume_of_finished_run_executes_nothing() {
        let h = Harness::new();
        for stage in PipelineStage::ALL {
            fixtures::write_valid_artifact(&h.layout, stage).unwrap();
        }
        let orchestrator = h.builder(RetryConfig::default()).build().unwrap();

        let report = orchestrator.resume().await.unwrap();

        assert_eq!(report.started_at, None);
        assert!(report.executed.is_empty());
        assert!(report.final_state.is_complete());
        assert_eq!(h.lifecycle_events(), vec!["pipeline.completed"]);
        assert_eq!(h.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rewritten_invalid_artifact_is_replaced() {
        let h = Harness::new();
        fixtures::write_invalid_artifact(&h.layout, PipelineStage::AnalyzeWebsite).unwrap();
        h.backend.push(fixtures::successful_turn(PipelineStage::AnalyzeWebsite));
        h.backend.push(ScriptedTurn::new().fail_to_start(
            crate::errors::BackendError::Rejected("quota".into()),
        ));
        let orchestrator = h.builder(RetryConfig::immediate(1)).build().unwrap();

        let failed = orchestrator.resume().await.unwrap_err();

        assert_eq!(failed.stage, PipelineStage::GenerateScenarios);
        assert_eq!(failed.error_kind(), FailureKind::BackendFailure);
        assert_eq!(
            failed.last_state.completed_stages(),
            vec![PipelineStage::AnalyzeWebsite]
        );
    }
}
