//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is usually loaded from a JSON file with
//! [`PipelineConfig::load`] and then adjusted by `WEBTESTFLOW_*` environment
//! variables through [`PipelineConfig::apply_env`].

use crate::core::PipelineStage;
use crate::errors::WebtestError;
use crate::executor::DEFAULT_PROGRAM;
use crate::pipeline::RetryConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`PipelineConfig::work_dir`].
pub const ENV_WORK_DIR: &str = "WEBTESTFLOW_WORK_DIR";
/// Environment variable overriding [`PipelineConfig::target_url`].
pub const ENV_TARGET_URL: &str = "WEBTESTFLOW_TARGET_URL";
/// Environment variable overriding [`PipelineConfig::claude_program`].
pub const ENV_CLAUDE_BIN: &str = "WEBTESTFLOW_CLAUDE_BIN";
/// Environment variable overriding [`PipelineConfig::model`].
pub const ENV_MODEL: &str = "WEBTESTFLOW_MODEL";
/// Environment variable overriding [`RetryConfig::max_attempts`].
pub const ENV_MAX_ATTEMPTS: &str = "WEBTESTFLOW_MAX_ATTEMPTS";

fn default_claude_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_skip_permissions() -> bool {
    true
}

fn default_calibration() -> bool {
    true
}

fn default_analyze_secs() -> u64 {
    600
}

fn default_scenarios_secs() -> u64 {
    600
}

fn default_test_cases_secs() -> u64 {
    900
}

fn default_run_tests_secs() -> u64 {
    1200
}

fn default_results_secs() -> u64 {
    600
}

/// Backend time budget per stage, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    /// Website analysis.
    #[serde(default = "default_analyze_secs")]
    pub analyze_website_secs: u64,
    /// Scenario generation.
    #[serde(default = "default_scenarios_secs")]
    pub generate_scenarios_secs: u64,
    /// Test case generation.
    #[serde(default = "default_test_cases_secs")]
    pub generate_test_cases_secs: u64,
    /// Test execution.
    #[serde(default = "default_run_tests_secs")]
    pub run_tests_secs: u64,
    /// Result analysis.
    #[serde(default = "default_results_secs")]
    pub analyze_results_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            analyze_website_secs: default_analyze_secs(),
            generate_scenarios_secs: default_scenarios_secs(),
            generate_test_cases_secs: default_test_cases_secs(),
            run_tests_secs: default_run_tests_secs(),
            analyze_results_secs: default_results_secs(),
        }
    }
}

impl StageTimeouts {
    /// The same budget for every stage.
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        let secs = timeout.as_secs().max(1);
        Self {
            analyze_website_secs: secs,
            generate_scenarios_secs: secs,
            generate_test_cases_secs: secs,
            run_tests_secs: secs,
            analyze_results_secs: secs,
        }
    }

    /// Returns the budget of a stage.
    #[must_use]
    pub const fn for_stage(&self, stage: PipelineStage) -> Duration {
        let secs = match stage {
            PipelineStage::AnalyzeWebsite => self.analyze_website_secs,
            PipelineStage::GenerateScenarios => self.generate_scenarios_secs,
            PipelineStage::GenerateTestCases => self.generate_test_cases_secs,
            PipelineStage::RunTests => self.run_tests_secs,
            PipelineStage::AnalyzeResults => self.analyze_results_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The website under test.
    pub target_url: String,
    /// Directory holding all artifacts of the run.
    pub work_dir: PathBuf,
    /// Program used to run the agentic backend.
    #[serde(default = "default_claude_program")]
    pub claude_program: String,
    /// Model passed to the backend, if any.
    #[serde(default)]
    pub model: Option<String>,
    /// Whether the backend skips its permission prompts.
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
    /// Retry policy per stage.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Backend time budget per stage.
    #[serde(default)]
    pub timeouts: StageTimeouts,
    /// Whether to adapt budgets and hints from recorded history.
    #[serde(default = "default_calibration")]
    pub calibration: bool,
}

impl PipelineConfig {
    /// Creates a config with defaults for everything but target and directory.
    #[must_use]
    pub fn new(target_url: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_url: target_url.into(),
            work_dir: work_dir.into(),
            claude_program: default_claude_program(),
            model: None,
            skip_permissions: default_skip_permissions(),
            retry: RetryConfig::default(),
            timeouts: StageTimeouts::default(),
            calibration: default_calibration(),
        }
    }

    /// Loads a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating config file {}", path.display()))?;
        Ok(config)
    }

    /// Applies `WEBTESTFLOW_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`WebtestError::Config`] if an override does not parse.
    pub fn apply_env(self) -> Result<Self, WebtestError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`WebtestError::Config`] if an override does not parse.
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, WebtestError> {
        if let Some(dir) = lookup(ENV_WORK_DIR) {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(ENV_TARGET_URL) {
            self.target_url = url;
        }
        if let Some(program) = lookup(ENV_CLAUDE_BIN) {
            self.claude_program = program;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.model = (!model.trim().is_empty()).then_some(model);
        }
        if let Some(attempts) = lookup(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = attempts.trim().parse().map_err(|_| {
                WebtestError::Config(format!("{ENV_MAX_ATTEMPTS} must be a positive integer, got '{attempts}'"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks field-level constraints.
    ///
    /// # Errors
    ///
    /// Returns [`WebtestError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), WebtestError> {
        if self.target_url.trim().is_empty() {
            return Err(WebtestError::Config("target_url must not be empty".into()));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(WebtestError::Config("work_dir must not be empty".into()));
        }
        if self.claude_program.trim().is_empty() {
            return Err(WebtestError::Config("claude_program must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(WebtestError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the backend program.
    #[must_use]
    pub fn with_claude_program(mut self, program: impl Into<String>) -> Self {
        self.claude_program = program.into();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the stage time budgets.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Enables or disables calibration.
    #[must_use]
    pub fn with_calibration(mut self, enabled: bool) -> Self {
        self.calibration = enabled;
        self
    }
}
