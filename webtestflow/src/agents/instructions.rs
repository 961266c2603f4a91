//! Instruction templates for the five stages.
//!
//! Each instruction names the target, embeds the upstream artifacts, states the
//! exact output path and format, and ends with the optional calibration hint.

use crate::artifacts::{
    ArtifactContent, PriorArtifacts, ValidatedArtifact, SCHEMA_VERSION, TEST_FILE_SUFFIXES,
};
use crate::core::PipelineStage;
use std::fmt::Write as _;

/// Upstream text longer than this many bytes is cut before embedding.
const MAX_EMBEDDED_BYTES: usize = 24_000;

/// Everything an instruction is built from.
#[derive(Debug, Clone, Copy)]
pub struct InstructionInput<'a> {
    /// The stage the instruction is for.
    pub stage: PipelineStage,
    /// The website under test.
    pub target_url: &'a str,
    /// Output path relative to the work directory.
    pub output: &'a str,
    /// Validated upstream artifacts.
    pub prior: &'a PriorArtifacts,
    /// Extra guidance from the calibrator.
    pub hint: Option<&'a str>,
}

/// Builds the instruction text for one stage attempt.
#[must_use]
pub fn build(input: &InstructionInput<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", task(input));
    out.push('\n');

    for upstream in input.stage.requires() {
        if let Some(artifact) = input.prior.get(*upstream) {
            embed(&mut out, artifact);
        }
    }

    let _ = writeln!(out, "## Output\n\n{}", format_requirements(input.stage, input.output));
    out.push_str(
        "\nSave the output with your file tools inside the current working directory. \
         The step only counts as done once the file exists on disk.\n",
    );
    if let Some(hint) = input.hint {
        let _ = writeln!(out, "\nNote: {hint}");
    }
    out
}

fn task(input: &InstructionInput<'_>) -> String {
    let url = input.target_url;
    match input.stage {
        PipelineStage::AnalyzeWebsite => format!(
            "# Analyze website\n\nExplore {url}. Identify its main pages, navigation, forms, \
             and interactive features that end-to-end tests should cover."
        ),
        PipelineStage::GenerateScenarios => format!(
            "# Generate test scenarios\n\nUsing the website analysis of {url} below, write \
             end-to-end test scenarios covering the main user journeys, including failure paths."
        ),
        PipelineStage::GenerateTestCases => format!(
            "# Generate test cases\n\nTurn every scenario below into runnable Playwright tests \
             against {url}. Use stable selectors and explicit assertions."
        ),
        PipelineStage::RunTests => format!(
            "# Run tests\n\nRun the test files listed below against {url} \
             (for example with `npx playwright test test-cases`) and record every result."
        ),
        PipelineStage::AnalyzeResults => format!(
            "# Analyze results\n\nAnalyze the test results for {url} below. Explain failures, \
             their likely causes, and recommended fixes."
        ),
    }
}

fn format_requirements(stage: PipelineStage, output: &str) -> String {
    let v = SCHEMA_VERSION;
    match stage {
        PipelineStage::AnalyzeWebsite => format!(
            "Write `{output}` as JSON:\n\
             {{\"schema_version\": {v}, \"url\": \"<target url>\", \"pages\": \
             [{{\"url\": \"...\", \"title\": \"...\", \"forms\": [], \"features\": []}}]}}\n\
             `pages` must not be empty; every page needs a `url` or `path`."
        ),
        PipelineStage::GenerateScenarios => format!(
            "Write `{output}` as JSON:\n\
             {{\"schema_version\": {v}, \"scenarios\": [{{\"id\": \"S1\", \"title\": \"...\", \
             \"steps\": [\"...\"], \"expected\": \"...\"}}]}}\n\
             Scenario ids must be unique and every scenario needs at least one step."
        ),
        PipelineStage::GenerateTestCases => format!(
            "Write one or more test files into the `{output}/` directory. File names must end \
             with one of: {}.",
            TEST_FILE_SUFFIXES.join(", ")
        ),
        PipelineStage::RunTests => format!(
            "Write `{output}` as JSON:\n\
             {{\"schema_version\": {v}, \"summary\": {{\"total\": 0, \"passed\": 0, \"failed\": 0, \
             \"skipped\": 0, \"timed_out\": 0}}, \"results\": [{{\"test\": \"...\", \
             \"status\": \"passed|failed|skipped|timed_out\", \"error\": \"...\"}}]}}\n\
             `results` must not be empty and the summary counts must match it."
        ),
        PipelineStage::AnalyzeResults => format!(
            "Write `{output}` as a Markdown report with at least one heading \
             (e.g. `# Test Report`, `## Failures`, `## Recommendations`)."
        ),
    }
}

fn embed(out: &mut String, artifact: &ValidatedArtifact) {
    let name = artifact
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let _ = writeln!(out, "## Input: {name} ({})\n", artifact.summary);
    match &artifact.content {
        ArtifactContent::Text(text) => {
            let _ = writeln!(out, "```\n{}\n```\n", truncate(text));
        }
        ArtifactContent::Files(files) => {
            for file in files {
                let _ = writeln!(out, "- {name}/{}", file.display());
            }
            out.push('\n');
        }
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_EMBEDDED_BYTES {
        return text.trim_end().to_string();
    }
    let mut end = MAX_EMBEDDED_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated)", &text[..end])
}
