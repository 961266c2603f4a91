//! Artifact layout, validation, and run-state inspection.
//!
//! Stages hand off to each other only through files in the work directory.
//! This module owns the naming contract for those files, the per-stage
//! validity checks, and the inspector that derives where a run should resume.

mod inspector;
mod layout;
mod validation;
mod walk;

pub use inspector::{log_run_state, ArtifactInspector, PriorArtifacts, RunState};
pub use layout::{
    is_test_file, ArtifactLayout, ArtifactSpec, ANALYSIS_REPORT_FILE, CALIBRATION_FILE,
    RESPONSES_DIR, SCHEMA_VERSION, STATE_DIR, TEST_CASES_DIR, TEST_FILE_SUFFIXES,
    TEST_RESULTS_FILE, TEST_SCENARIOS_FILE, WEBSITE_ANALYSIS_FILE,
};
pub use validation::{
    validate_analysis_report, validate_test_files, validate_test_results,
    validate_test_scenarios, validate_website_analysis, ArtifactContent, ValidatedArtifact,
};
pub(crate) use walk::walk_files;
