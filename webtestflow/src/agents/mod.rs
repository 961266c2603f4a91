//! Stage agents.
//!
//! A stage agent turns one pipeline stage into one confirmed backend call:
//! it checks its upstream artifacts, builds the stage instruction, runs it
//! through the [`ExecutionPrimitive`], and validates what landed on disk.
//! All five agents share [`ArtifactAgent`]; only the stage differs.

pub mod instructions;

use crate::artifacts::{ArtifactInspector, ArtifactLayout, ArtifactSpec, ValidatedArtifact};
use crate::core::PipelineStage;
use crate::errors::StageError;
use crate::executor::{ExecutionPrimitive, ExecutionRequest};
use async_trait::async_trait;
use instructions::InstructionInput;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Per-attempt input handed to an agent by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct StageRunContext {
    /// 1-based attempt number within the stage.
    pub attempt: usize,
    /// Extra instruction text from the calibrator.
    pub hint: Option<String>,
}

impl StageRunContext {
    /// Creates the context of an attempt.
    #[must_use]
    pub fn new(attempt: usize) -> Self {
        Self {
            attempt,
            hint: None,
        }
    }

    /// Sets the calibrator hint.
    #[must_use]
    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }
}

/// An agent responsible for producing one stage's artifact.
#[async_trait]
pub trait StageAgent: Send + Sync {
    /// The stage this agent produces.
    fn stage(&self) -> PipelineStage;

    /// Runs one attempt of the stage.
    ///
    /// Execution errors are returned unchanged inside
    /// [`StageError::ExecutionFailed`]; agents never retry on their own.
    async fn run(&self, ctx: &StageRunContext) -> Result<ValidatedArtifact, StageError>;
}

/// The agent behind every stage: instruction template, expected output, and
/// validity check all come from the stage.
pub struct ArtifactAgent {
    stage: PipelineStage,
    inspector: ArtifactInspector,
    primitive: Arc<ExecutionPrimitive>,
    target_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for ArtifactAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactAgent")
            .field("stage", &self.stage)
            .field("target_url", &self.target_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ArtifactAgent {
    /// Creates an agent for `stage`.
    #[must_use]
    pub fn new(
        stage: PipelineStage,
        layout: ArtifactLayout,
        primitive: Arc<ExecutionPrimitive>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            inspector: ArtifactInspector::new(layout),
            primitive,
            target_url: target_url.into(),
            timeout: crate::config::StageTimeouts::default().for_stage(stage),
        }
    }

    /// Website Analyzer: explores the target and writes `website-analysis.json`.
    #[must_use]
    pub fn website_analyzer(
        layout: ArtifactLayout,
        primitive: Arc<ExecutionPrimitive>,
        target_url: impl Into<String>,
    ) -> Self {
        Self::new(PipelineStage::AnalyzeWebsite, layout, primitive, target_url)
    }

    /// Scenario Generator: writes `test-scenarios.json`.
    #[must_use]
    pub fn scenario_generator(
        layout: ArtifactLayout,
        primitive: Arc<ExecutionPrimitive>,
        target_url: impl Into<String>,
    ) -> Self {
        Self::new(PipelineStage::GenerateScenarios, layout, primitive, target_url)
    }

    /// Test Case Generator: writes test files into `test-cases/`.
    #[must_use]
    pub fn test_case_generator(
        layout: ArtifactLayout,
        primitive: Arc<ExecutionPrimitive>,
        target_url: impl Into<String>,
    ) -> Self {
        Self::new(PipelineStage::GenerateTestCases, layout, primitive, target_url)
    }

    /// Test Runner: runs the tests and writes `test-results.json`.
    #[must_use]
    pub fn test_runner(
        layout: ArtifactLayout,
        primitive: Arc<ExecutionPrimitive>,
        target_url: impl Into<String>,
    ) -> Self {
        Self::new(PipelineStage::RunTests, layout, primitive, target_url)
    }

    /// Result Analyzer: writes `test-report.md`.
    #[must_use]
    pub fn result_analyzer(
        layout: ArtifactLayout,
        primitive: Arc<ExecutionPrimitive>,
        target_url: impl Into<String>,
    ) -> Self {
        Self::new(PipelineStage::AnalyzeResults, layout, primitive, target_url)
    }

    /// Sets the time budget of the backend call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the time budget of the backend call.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl StageAgent for ArtifactAgent {
    fn stage(&self) -> PipelineStage {
        self.stage
    }

    async fn run(&self, ctx: &StageRunContext) -> Result<ValidatedArtifact, StageError> {
        let stage = self.stage;
        let prior = self
            .inspector
            .collect_prior(stage)
            .await
            .map_err(|(upstream, source)| StageError::InvalidInput {
                stage,
                upstream,
                source,
            })?;

        let output = ArtifactSpec::for_stage(stage).relative();
        let instruction = instructions::build(&InstructionInput {
            stage,
            target_url: &self.target_url,
            output,
            prior: &prior,
            hint: ctx.hint.as_deref(),
        });
        debug!(
            stage = %stage,
            attempt = ctx.attempt,
            instruction_chars = instruction.len(),
            hinted = ctx.hint.is_some(),
            "Built stage instruction"
        );

        let request = ExecutionRequest::new(stage.as_str(), instruction)
            .expecting(self.inspector.layout().expected_output(stage))
            .with_timeout(self.timeout);
        let result = self
            .primitive
            .execute(&request)
            .await
            .map_err(|source| StageError::ExecutionFailed { stage, source })?;

        let artifact = self
            .inspector
            .validate_stage(stage)
            .await
            .map_err(|source| StageError::ValidationFailed { stage, source })?;

        info!(
            stage = %stage,
            attempt = ctx.attempt,
            summary = %artifact.summary,
            changed_files = result.changed_files.len(),
            "Stage artifact produced"
        );
        Ok(artifact)
    }
}

/// Builds the five stage agents over one primitive.
///
/// `timeouts` supplies each agent's backend time budget.
#[must_use]
pub fn standard_agents(
    layout: &ArtifactLayout,
    primitive: &Arc<ExecutionPrimitive>,
    target_url: &str,
    timeouts: &crate::config::StageTimeouts,
) -> BTreeMap<PipelineStage, Arc<dyn StageAgent>> {
    PipelineStage::ALL
        .iter()
        .map(|stage| {
            let agent = ArtifactAgent::new(*stage, layout.clone(), Arc::clone(primitive), target_url)
                .with_timeout(timeouts.for_stage(*stage));
            (*stage, Arc::new(agent) as Arc<dyn StageAgent>)
        })
        .collect()
}
