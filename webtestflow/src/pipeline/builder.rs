//! Orchestrator builder with validation.

use super::orchestrator::PipelineOrchestrator;
use super::retry::RetryConfig;
use crate::agents::StageAgent;
use crate::artifacts::{ArtifactInspector, ArtifactLayout};
use crate::calibration::Calibrator;
use crate::cancellation::CancellationToken;
use crate::core::PipelineStage;
use crate::errors::PipelineValidationError;
use crate::events::{EventSink, NoOpEventSink};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builder for a [`PipelineOrchestrator`].
///
/// Every stage needs exactly one agent; [`OrchestratorBuilder::build`]
/// rejects incomplete or mismatched agent sets.
pub struct OrchestratorBuilder {
    layout: ArtifactLayout,
    agents: BTreeMap<PipelineStage, Arc<dyn StageAgent>>,
    retry: RetryConfig,
    calibrator: Option<Arc<dyn Calibrator>>,
    event_sink: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("layout", &self.layout)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .field("calibrated", &self.calibrator.is_some())
            .finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    /// Creates a builder over `layout` with no agents.
    #[must_use]
    pub fn new(layout: ArtifactLayout) -> Self {
        Self {
            layout,
            agents: BTreeMap::new(),
            retry: RetryConfig::default(),
            calibrator: None,
            event_sink: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Registers an agent under the stage it reports.
    ///
    /// A later agent for the same stage replaces the earlier one.
    #[must_use]
    pub fn agent(mut self, agent: Arc<dyn StageAgent>) -> Self {
        self.agents.insert(agent.stage(), agent);
        self
    }

    /// Registers several agents keyed by stage.
    #[must_use]
    pub fn agents(
        mut self,
        agents: impl IntoIterator<Item = (PipelineStage, Arc<dyn StageAgent>)>,
    ) -> Self {
        self.agents.extend(agents);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the calibrator, which overrides the retry budget per stage.
    #[must_use]
    pub fn calibrator(mut self, calibrator: Arc<dyn Calibrator>) -> Self {
        self.calibrator = Some(calibrator);
        self
    }

    /// Sets the sink for lifecycle events.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Shares a cancellation token with the orchestrator.
    #[must_use]
    pub fn cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Validates the agent set and builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage has no agent or an agent is registered
    /// under a stage it does not produce.
    pub fn build(self) -> Result<PipelineOrchestrator, PipelineValidationError> {
        let mismatched: Vec<PipelineStage> = self
            .agents
            .iter()
            .filter(|(stage, agent)| agent.stage() != **stage)
            .map(|(stage, _)| *stage)
            .collect();
        if !mismatched.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Agents registered under the wrong stage: {}",
                join(&mismatched)
            ))
            .with_stages(mismatched));
        }

        let missing: Vec<PipelineStage> = PipelineStage::ALL
            .into_iter()
            .filter(|stage| !self.agents.contains_key(stage))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "No agent for stage(s): {}",
                join(&missing)
            ))
            .with_stages(missing));
        }

        // BTreeMap iteration follows stage order, so index == stage.index().
        let agents = self.agents.into_values().collect();
        Ok(PipelineOrchestrator {
            inspector: ArtifactInspector::new(self.layout),
            agents,
            retry: self.retry,
            calibrator: self.calibrator,
            event_sink: self.event_sink,
            cancel: self.cancel,
            state: RwLock::new(None),
            run_guard: tokio::sync::Mutex::new(()),
        })
    }
}

fn join(stages: &[PipelineStage]) -> String {
    stages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
