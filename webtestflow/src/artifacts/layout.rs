//! Conventional artifact paths inside a work directory.

use crate::core::PipelineStage;
use crate::executor::ExpectedOutput;
use std::path::{Path, PathBuf};

/// Schema version written into and required from every JSON artifact.
pub const SCHEMA_VERSION: u32 = 1;

/// Output of [`PipelineStage::AnalyzeWebsite`].
pub const WEBSITE_ANALYSIS_FILE: &str = "website-analysis.json";
/// Output of [`PipelineStage::GenerateScenarios`].
pub const TEST_SCENARIOS_FILE: &str = "test-scenarios.json";
/// Output directory of [`PipelineStage::GenerateTestCases`].
pub const TEST_CASES_DIR: &str = "test-cases";
/// Output of [`PipelineStage::RunTests`].
pub const TEST_RESULTS_FILE: &str = "test-results.json";
/// Output of [`PipelineStage::AnalyzeResults`].
pub const ANALYSIS_REPORT_FILE: &str = "test-report.md";

/// File name suffixes that count as runnable test files.
pub const TEST_FILE_SUFFIXES: [&str; 4] = [".spec.ts", ".test.ts", ".spec.js", ".test.js"];

/// Hidden directory for bookkeeping files that are not stage artifacts.
pub const STATE_DIR: &str = ".webtestflow";
/// Subdirectory of [`STATE_DIR`] holding raw backend responses.
pub const RESPONSES_DIR: &str = "responses";
/// File inside [`STATE_DIR`] holding calibration history.
pub const CALIBRATION_FILE: &str = "calibration.json";

/// The on-disk shape of a stage artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSpec {
    /// A single file.
    File(&'static str),
    /// A directory that must contain at least one runnable test file.
    TestDirectory(&'static str),
}

impl ArtifactSpec {
    /// Returns the spec for a stage.
    #[must_use]
    pub const fn for_stage(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::AnalyzeWebsite => Self::File(WEBSITE_ANALYSIS_FILE),
            PipelineStage::GenerateScenarios => Self::File(TEST_SCENARIOS_FILE),
            PipelineStage::GenerateTestCases => Self::TestDirectory(TEST_CASES_DIR),
            PipelineStage::RunTests => Self::File(TEST_RESULTS_FILE),
            PipelineStage::AnalyzeResults => Self::File(ANALYSIS_REPORT_FILE),
        }
    }

    /// Returns the path relative to the work directory.
    #[must_use]
    pub const fn relative(&self) -> &'static str {
        match self {
            Self::File(name) | Self::TestDirectory(name) => name,
        }
    }
}

/// Returns true if a file name looks like a runnable test file.
#[must_use]
pub fn is_test_file(name: &str) -> bool {
    TEST_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Resolves every conventional path of one pipeline run.
///
/// Both the stage agents and the inspector go through this type, so the two
/// sides always agree on file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    work_dir: PathBuf,
}

impl ArtifactLayout {
    /// Creates a layout rooted at `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Returns the work directory.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Returns the absolute artifact path of a stage.
    #[must_use]
    pub fn artifact_path(&self, stage: PipelineStage) -> PathBuf {
        self.work_dir.join(ArtifactSpec::for_stage(stage).relative())
    }

    /// Returns the output a backend call for `stage` is expected to produce.
    #[must_use]
    pub fn expected_output(&self, stage: PipelineStage) -> ExpectedOutput {
        match ArtifactSpec::for_stage(stage) {
            ArtifactSpec::File(name) => ExpectedOutput::File(PathBuf::from(name)),
            ArtifactSpec::TestDirectory(dir) => ExpectedOutput::AnyFileIn {
                dir: PathBuf::from(dir),
                suffixes: TEST_FILE_SUFFIXES.iter().map(ToString::to_string).collect(),
            },
        }
    }

    /// Directory for bookkeeping files.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.work_dir.join(STATE_DIR)
    }

    /// Directory where raw backend responses are persisted.
    #[must_use]
    pub fn responses_dir(&self) -> PathBuf {
        self.state_dir().join(RESPONSES_DIR)
    }

    /// Path of the calibration history file.
    #[must_use]
    pub fn calibration_path(&self) -> PathBuf {
        self.state_dir().join(CALIBRATION_FILE)
    }
}
