//! The ordered pipeline stage enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One step of the web-test pipeline.
///
/// Stages form a total order with no branches: every stage consumes the
/// artifact of the stage before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Crawl and describe the target website.
    AnalyzeWebsite,
    /// Derive test scenarios from the website analysis.
    GenerateScenarios,
    /// Compile scenarios into runnable test files.
    GenerateTestCases,
    /// Execute the generated tests.
    RunTests,
    /// Summarize the test results.
    AnalyzeResults,
}

impl PipelineStage {
    /// All stages in execution order.
    pub const ALL: [Self; 5] = [
        Self::AnalyzeWebsite,
        Self::GenerateScenarios,
        Self::GenerateTestCases,
        Self::RunTests,
        Self::AnalyzeResults,
    ];

    /// Returns the first stage of the pipeline.
    #[must_use]
    pub const fn first() -> Self {
        Self::AnalyzeWebsite
    }

    /// Returns the zero-based position of the stage.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::AnalyzeWebsite => 0,
            Self::GenerateScenarios => 1,
            Self::GenerateTestCases => 2,
            Self::RunTests => 3,
            Self::AnalyzeResults => 4,
        }
    }

    /// Returns the stage that follows this one, if any.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Returns the stage that precedes this one, if any.
    #[must_use]
    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Returns the stages whose artifacts this stage reads.
    #[must_use]
    pub fn requires(self) -> &'static [Self] {
        &Self::ALL[..self.index()]
    }

    /// Iterates over this stage and every stage after it.
    pub fn from_here(self) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().skip(self.index())
    }

    /// Human-readable name of the agent responsible for the stage.
    #[must_use]
    pub const fn agent_name(self) -> &'static str {
        match self {
            Self::AnalyzeWebsite => "website analyzer",
            Self::GenerateScenarios => "scenario generator",
            Self::GenerateTestCases => "test case generator",
            Self::RunTests => "test runner",
            Self::AnalyzeResults => "result analyzer",
        }
    }

    /// Returns the snake_case identifier used in logs and file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AnalyzeWebsite => "analyze_website",
            Self::GenerateScenarios => "generate_scenarios",
            Self::GenerateTestCases => "generate_test_cases",
            Self::RunTests => "run_tests",
            Self::AnalyzeResults => "analyze_results",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stage name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown pipeline stage: {0}")]
pub struct UnknownStageError(pub String);

impl FromStr for PipelineStage {
    type Err = UnknownStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStageError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(PipelineStage::AnalyzeWebsite < PipelineStage::GenerateScenarios);
        assert!(PipelineStage::RunTests < PipelineStage::AnalyzeResults);

        let mut sorted = PipelineStage::ALL;
        sorted.sort();
        assert_eq!(sorted, PipelineStage::ALL);
    }

    #[test]
    fn test_next_and_previous() {
        assert_eq!(
            PipelineStage::AnalyzeWebsite.next(),
            Some(PipelineStage::GenerateScenarios)
        );
        assert_eq!(PipelineStage::AnalyzeResults.next(), None);
        assert_eq!(PipelineStage::AnalyzeWebsite.previous(), None);
        assert_eq!(
            PipelineStage::RunTests.previous(),
            Some(PipelineStage::GenerateTestCases)
        );
    }

    #[test]
    fn test_requires_is_every_earlier_stage() {
        assert!(PipelineStage::AnalyzeWebsite.requires().is_empty());
        assert_eq!(
            PipelineStage::GenerateTestCases.requires(),
            &[PipelineStage::AnalyzeWebsite, PipelineStage::GenerateScenarios]
        );
    }

    #[test]
    fn test_from_here() {
        let rest: Vec<_> = PipelineStage::RunTests.from_here().collect();
        assert_eq!(rest, vec![PipelineStage::RunTests, PipelineStage::AnalyzeResults]);
    }

    #[test]
    fn test_display_and_parse() {
        for stage in PipelineStage::ALL {
            let parsed: PipelineStage = stage.to_string().parse().unwrap();
            assert_eq!(parsed, stage);
        }
        assert!("deploy".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_stage_serialize() {
        let json = serde_json::to_string(&PipelineStage::GenerateTestCases).unwrap();
        assert_eq!(json, r#""generate_test_cases""#);
    }
}
