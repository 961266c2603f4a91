//! Artifact content and scripted turns for each pipeline stage.

use super::claude_events;
use super::scripted::ScriptedTurn;
use crate::artifacts::{ArtifactLayout, ArtifactSpec, TEST_CASES_DIR};
use crate::core::PipelineStage;
use std::io;
use std::path::PathBuf;

/// Target URL used by fixture content.
pub const FIXTURE_URL: &str = "https://shop.example.test";

/// File written into the test case directory by fixtures.
pub const FIXTURE_TEST_FILE: &str = "checkout.spec.ts";

/// Returns the relative path and content of a valid artifact for `stage`.
#[must_use]
pub fn valid_artifact(stage: PipelineStage) -> (PathBuf, String) {
    match stage {
        PipelineStage::AnalyzeWebsite => (
            relative(stage),
            serde_json::json!({
                "schema_version": 1,
                "url": FIXTURE_URL,
                "pages": [
                    {"url": format!("{FIXTURE_URL}/"), "title": "Home"},
                    {"path": "/cart", "title": "Cart", "forms": ["update-quantity"]}
                ]
            })
            .to_string(),
        ),
        PipelineStage::GenerateScenarios => (
            relative(stage),
            serde_json::json!({
                "schema_version": 1,
                "scenarios": [
                    {"id": "S1", "title": "Add to cart", "steps": ["open /", "click add", "open /cart"]},
                    {"id": "S2", "title": "Checkout", "steps": ["open /cart", "submit checkout"]}
                ]
            })
            .to_string(),
        ),
        PipelineStage::GenerateTestCases => (
            PathBuf::from(TEST_CASES_DIR).join(FIXTURE_TEST_FILE),
            "import { test, expect } from '@playwright/test';\n\
             test('checkout', async ({ page }) => {\n  await page.goto('/cart');\n});\n"
                .to_string(),
        ),
        PipelineStage::RunTests => (
            relative(stage),
            serde_json::json!({
                "schema_version": 1,
                "summary": {"total": 2, "passed": 1, "failed": 1},
                "results": [
                    {"test": "add to cart", "status": "passed"},
                    {"test": "checkout", "status": "failed", "error": "timeout waiting for #pay"}
                ]
            })
            .to_string(),
        ),
        PipelineStage::AnalyzeResults => (
            relative(stage),
            "# Test Report\n\n## Summary\n\n1 of 2 tests passed.\n\n## Failures\n\n- checkout\n"
                .to_string(),
        ),
    }
}

/// Returns the relative path and content of an artifact that exists but
/// fails validation.
#[must_use]
pub fn invalid_artifact(stage: PipelineStage) -> (PathBuf, String) {
    match stage {
        PipelineStage::AnalyzeWebsite => (
            relative(stage),
            r#"{"schema_version":1,"url":"https://shop.example.test","pages":[]}"#.to_string(),
        ),
        PipelineStage::GenerateScenarios => (
            relative(stage),
            r#"{"schema_version":1,"scenarios":[]}"#.to_string(),
        ),
        PipelineStage::GenerateTestCases => (
            PathBuf::from(TEST_CASES_DIR).join("helpers.ts"),
            "export const base = '/';\n".to_string(),
        ),
        PipelineStage::RunTests => (
            relative(stage),
            r#"{"schema_version":1,"results":[{"test":"checkout","status":"flaky"}]}"#.to_string(),
        ),
        PipelineStage::AnalyzeResults => {
            (relative(stage), "no headings in this report\n".to_string())
        }
    }
}

fn relative(stage: PipelineStage) -> PathBuf {
    PathBuf::from(ArtifactSpec::for_stage(stage).relative())
}

fn write(layout: &ArtifactLayout, (rel, content): (PathBuf, String)) -> io::Result<()> {
    let path = layout.work_dir().join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

/// Writes a valid artifact for `stage` into the layout's work directory.
pub fn write_valid_artifact(layout: &ArtifactLayout, stage: PipelineStage) -> io::Result<()> {
    write(layout, valid_artifact(stage))
}

/// Writes an invalid artifact for `stage` into the layout's work directory.
pub fn write_invalid_artifact(layout: &ArtifactLayout, stage: PipelineStage) -> io::Result<()> {
    write(layout, invalid_artifact(stage))
}

/// Writes valid artifacts for every stage before `stage`.
pub fn write_valid_prefix(layout: &ArtifactLayout, stage: PipelineStage) -> io::Result<()> {
    stage
        .requires()
        .iter()
        .try_for_each(|upstream| write_valid_artifact(layout, *upstream))
}

/// A turn that writes a valid artifact for `stage` and ends successfully.
#[must_use]
pub fn successful_turn(stage: PipelineStage) -> ScriptedTurn {
    turn_writing(stage, valid_artifact(stage))
}

/// A turn that writes an artifact failing validation and ends successfully.
#[must_use]
pub fn invalid_turn(stage: PipelineStage) -> ScriptedTurn {
    turn_writing(stage, invalid_artifact(stage))
}

/// A turn that claims to write the artifact but leaves the disk untouched.
#[must_use]
pub fn hollow_turn(stage: PipelineStage) -> ScriptedTurn {
    let (rel, content) = valid_artifact(stage);
    ScriptedTurn::new()
        .event(claude_events::write_tool_use(
            &format!("{}-write", stage.as_str()),
            &rel.to_string_lossy(),
            &content,
        ))
        .event(claude_events::result_success("The file has been written."))
}

/// A turn whose stream ends with a backend error.
#[must_use]
pub fn error_turn(message: &str) -> ScriptedTurn {
    ScriptedTurn::new().event(claude_events::result_error(message))
}

fn turn_writing(stage: PipelineStage, (rel, content): (PathBuf, String)) -> ScriptedTurn {
    let path = rel.to_string_lossy().into_owned();
    ScriptedTurn::new()
        .event(claude_events::text(&format!("Working on {stage}.")))
        .write(rel, content.clone())
        .event(claude_events::write_tool_use(
            &format!("{}-write", stage.as_str()),
            &path,
            &content,
        ))
        .event(claude_events::result_success(&format!("{stage} complete.")))
}
