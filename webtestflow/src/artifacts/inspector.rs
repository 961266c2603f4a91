//! Derives the resumption point of a run from its work directory.

use super::layout::ArtifactLayout;
use super::walk::walk_files;
use super::validation::{
    validate_analysis_report, validate_test_files, validate_test_results,
    validate_test_scenarios, validate_website_analysis, ValidatedArtifact,
};
use crate::core::PipelineStage;
use crate::errors::ArtifactInvalid;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Progress of a run, derived from the artifacts on disk.
///
/// Never persisted: every call to [`ArtifactInspector::analyze`] recomputes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// The first stage whose artifact is missing or invalid, or `None` when
    /// every artifact is valid.
    pub next_step: Option<PipelineStage>,
    /// Human-readable explanation of `next_step`.
    pub reason: String,
    /// Valid artifacts of every stage before `next_step`, in order.
    pub validated: Vec<ValidatedArtifact>,
    /// Why the artifact of `next_step` was rejected.
    pub blocking: Option<ArtifactInvalid>,
}

impl RunState {
    /// Returns true if every stage has a valid artifact.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.next_step.is_none()
    }

    /// Returns the stages whose artifacts are valid.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<PipelineStage> {
        self.validated.iter().map(|a| a.stage).collect()
    }
}

/// Validated upstream artifacts handed to a stage agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorArtifacts {
    artifacts: BTreeMap<PipelineStage, ValidatedArtifact>,
}

impl PriorArtifacts {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artifact.
    pub fn insert(&mut self, artifact: ValidatedArtifact) {
        self.artifacts.insert(artifact.stage, artifact);
    }

    /// Returns the artifact of a stage.
    #[must_use]
    pub fn get(&self, stage: PipelineStage) -> Option<&ValidatedArtifact> {
        self.artifacts.get(&stage)
    }

    /// Returns the number of artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if there are no artifacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Read-only inspector over one work directory.
#[derive(Debug, Clone)]
pub struct ArtifactInspector {
    layout: ArtifactLayout,
}

impl ArtifactInspector {
    /// Creates an inspector for a layout.
    #[must_use]
    pub const fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    /// Returns the layout being inspected.
    #[must_use]
    pub const fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Applies the validity check of one stage to its artifact.
    pub async fn validate_stage(&self, stage: PipelineStage) -> Result<ValidatedArtifact, ArtifactInvalid> {
        let path = self.layout.artifact_path(stage);
        match file_validator(stage) {
            Some(validate) => {
                let text = read_artifact(&path).await?;
                validate(&path, &text)
            }
            None => {
                let entries = list_files(&path).await?;
                validate_test_files(&path, &entries)
            }
        }
    }

    /// Determines the stage a run should resume from.
    ///
    /// Stages are checked in order and the scan stops at the first invalid
    /// artifact, so leftovers of later stages never count.
    pub async fn analyze(&self) -> RunState {
        let mut validated = Vec::new();

        for stage in PipelineStage::ALL {
            match self.validate_stage(stage).await {
                Ok(artifact) => {
                    debug!(stage = %stage, summary = %artifact.summary, "Artifact valid");
                    validated.push(artifact);
                }
                Err(invalid) => {
                    let reason = if validated.is_empty() {
                        format!("Starting from {stage}: {invalid}")
                    } else {
                        format!(
                            "{} stage(s) complete; resuming at {stage}: {invalid}",
                            validated.len()
                        )
                    };
                    return RunState {
                        next_step: Some(stage),
                        reason,
                        validated,
                        blocking: Some(invalid),
                    };
                }
            }
        }

        RunState {
            next_step: None,
            reason: "All stage artifacts are present and valid".to_string(),
            validated,
            blocking: None,
        }
    }

    /// Collects the validated artifacts `stage` depends on.
    ///
    /// Fails with the first upstream stage whose artifact is unusable.
    pub async fn collect_prior(
        &self,
        stage: PipelineStage,
    ) -> Result<PriorArtifacts, (PipelineStage, ArtifactInvalid)> {
        let mut prior = PriorArtifacts::new();
        for upstream in stage.requires() {
            let artifact = self
                .validate_stage(*upstream)
                .await
                .map_err(|invalid| (*upstream, invalid))?;
            prior.insert(artifact);
        }
        Ok(prior)
    }
}

type FileValidator = fn(&Path, &str) -> Result<ValidatedArtifact, ArtifactInvalid>;

/// Returns the content check of a single-file artifact, or `None` for the
/// test case directory.
fn file_validator(stage: PipelineStage) -> Option<FileValidator> {
    match stage {
        PipelineStage::AnalyzeWebsite => Some(validate_website_analysis),
        PipelineStage::GenerateScenarios => Some(validate_test_scenarios),
        PipelineStage::GenerateTestCases => None,
        PipelineStage::RunTests => Some(validate_test_results),
        PipelineStage::AnalyzeResults => Some(validate_analysis_report),
    }
}

async fn read_artifact(path: &Path) -> Result<String, ArtifactInvalid> {
    match tokio::fs::read(path).await {
        // Lossy decoding keeps a half-written multibyte sequence from being an IO error.
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(ArtifactInvalid::Missing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ArtifactInvalid::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Lists every regular file under `root` with its size, relative to `root`.
async fn list_files(root: &Path) -> Result<Vec<(PathBuf, u64)>, ArtifactInvalid> {
    let io_err = |e: std::io::Error| ArtifactInvalid::Io {
        path: root.to_path_buf(),
        reason: e.to_string(),
    };

    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(ArtifactInvalid::malformed(root, "expected a directory"));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ArtifactInvalid::Missing {
                path: root.to_path_buf(),
            });
        }
        Err(e) => return Err(io_err(e)),
    }

    walk_files(root).await.map_err(io_err)
}

/// Logs a run state for operator visibility.
///
/// This is a pure projection; nothing reads its output.
pub fn log_run_state(state: &RunState) {
    let completed: Vec<String> = state
        .completed_stages()
        .iter()
        .map(ToString::to_string)
        .collect();

    match state.next_step {
        Some(stage) => info!(
            next_step = %stage,
            completed = ?completed,
            reason = %state.reason,
            "Pipeline resumption point"
        ),
        None => info!(completed = ?completed, "Pipeline artifacts complete"),
    }
    for artifact in &state.validated {
        debug!(
            stage = %artifact.stage,
            path = %artifact.path.display(),
            summary = %artifact.summary,
            "Validated artifact"
        );
    }
}
