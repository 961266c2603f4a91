//! Versioned schema checks for each stage artifact.
//!
//! A check only establishes that an artifact is structurally usable by the
//! next stage, not that its content is good.

use super::layout::{is_test_file, SCHEMA_VERSION};
use crate::core::PipelineStage;
use crate::errors::ArtifactInvalid;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Allowed values of a test result `status` field.
const RESULT_STATUSES: [&str; 4] = ["passed", "failed", "skipped", "timed_out"];

/// Content of a validated artifact, as handed to downstream stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    /// The full text of a file artifact.
    Text(String),
    /// The runnable test files of a directory artifact, relative to it.
    Files(Vec<PathBuf>),
}

/// An artifact that passed its stage's validity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedArtifact {
    /// The stage that produced it.
    pub stage: PipelineStage,
    /// Absolute path of the artifact.
    pub path: PathBuf,
    /// Short human-readable description (e.g. "4 scenario(s)").
    pub summary: String,
    /// The artifact content.
    pub content: ArtifactContent,
}

impl ValidatedArtifact {
    /// Returns the text content, if the artifact is a file.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            ArtifactContent::Text(text) => Some(text),
            ArtifactContent::Files(_) => None,
        }
    }
}

fn parse_versioned(path: &Path, text: &str) -> Result<Map<String, Value>, ArtifactInvalid> {
    if text.trim().is_empty() {
        return Err(ArtifactInvalid::Empty {
            path: path.to_path_buf(),
        });
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| ArtifactInvalid::malformed(path, format!("invalid JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(ArtifactInvalid::malformed(path, "expected a JSON object"));
    };

    let version = map
        .get("schema_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| ArtifactInvalid::malformed(path, "missing numeric schema_version"))?;
    if version != u64::from(SCHEMA_VERSION) {
        return Err(ArtifactInvalid::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
            expected: SCHEMA_VERSION,
        });
    }

    Ok(map)
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn non_empty_array<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &Path,
) -> Result<&'a Vec<Value>, ArtifactInvalid> {
    match map.get(key) {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items),
        Some(Value::Array(_)) => Err(ArtifactInvalid::malformed(
            path,
            format!("'{key}' must list at least one entry"),
        )),
        _ => Err(ArtifactInvalid::malformed(
            path,
            format!("missing '{key}' array"),
        )),
    }
}

fn text_artifact(stage: PipelineStage, path: &Path, text: &str, summary: String) -> ValidatedArtifact {
    ValidatedArtifact {
        stage,
        path: path.to_path_buf(),
        summary,
        content: ArtifactContent::Text(text.to_string()),
    }
}

/// Checks `website-analysis.json`.
pub fn validate_website_analysis(path: &Path, text: &str) -> Result<ValidatedArtifact, ArtifactInvalid> {
    let map = parse_versioned(path, text)?;
    let url = map
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ArtifactInvalid::malformed(path, "missing site 'url'"))?;
    let pages = non_empty_array(&map, "pages", path)?;

    for (i, page) in pages.iter().enumerate() {
        if non_empty_str(page, "url").is_none() && non_empty_str(page, "path").is_none() {
            return Err(ArtifactInvalid::malformed(
                path,
                format!("pages[{i}] has neither 'url' nor 'path'"),
            ));
        }
    }

    Ok(text_artifact(
        PipelineStage::AnalyzeWebsite,
        path,
        text,
        format!("{} page(s) of {url}", pages.len()),
    ))
}

/// Checks `test-scenarios.json`.
pub fn validate_test_scenarios(path: &Path, text: &str) -> Result<ValidatedArtifact, ArtifactInvalid> {
    let map = parse_versioned(path, text)?;
    let scenarios = non_empty_array(&map, "scenarios", path)?;

    let mut ids = HashSet::new();
    for (i, scenario) in scenarios.iter().enumerate() {
        let id = non_empty_str(scenario, "id")
            .ok_or_else(|| ArtifactInvalid::malformed(path, format!("scenarios[{i}] has no 'id'")))?;
        if non_empty_str(scenario, "title").is_none() {
            return Err(ArtifactInvalid::malformed(
                path,
                format!("scenario '{id}' has no 'title'"),
            ));
        }
        let steps_ok = scenario
            .get("steps")
            .and_then(Value::as_array)
            .is_some_and(|steps| {
                !steps.is_empty()
                    && steps
                        .iter()
                        .all(|s| s.as_str().is_some_and(|s| !s.trim().is_empty()))
            });
        if !steps_ok {
            return Err(ArtifactInvalid::malformed(
                path,
                format!("scenario '{id}' needs a non-empty list of step strings"),
            ));
        }
        if !ids.insert(id.to_string()) {
            return Err(ArtifactInvalid::malformed(
                path,
                format!("duplicate scenario id '{id}'"),
            ));
        }
    }

    Ok(text_artifact(
        PipelineStage::GenerateScenarios,
        path,
        text,
        format!("{} scenario(s)", scenarios.len()),
    ))
}

/// Checks the test case directory listing.
///
/// `entries` holds every file found under `dir` (relative path and size).
pub fn validate_test_files(dir: &Path, entries: &[(PathBuf, u64)]) -> Result<ValidatedArtifact, ArtifactInvalid> {
    let runnable: Vec<&(PathBuf, u64)> = entries
        .iter()
        .filter(|(rel, _)| {
            rel.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_test_file)
        })
        .collect();

    if runnable.is_empty() {
        return Err(ArtifactInvalid::malformed(
            dir,
            "no runnable test files (*.spec.ts, *.test.ts, *.spec.js, *.test.js)",
        ));
    }

    let mut files: Vec<PathBuf> = runnable
        .iter()
        .filter(|(_, size)| *size > 0)
        .map(|(rel, _)| rel.clone())
        .collect();
    if files.is_empty() {
        return Err(ArtifactInvalid::Empty {
            path: dir.to_path_buf(),
        });
    }
    files.sort();

    Ok(ValidatedArtifact {
        stage: PipelineStage::GenerateTestCases,
        path: dir.to_path_buf(),
        summary: format!("{} test file(s)", files.len()),
        content: ArtifactContent::Files(files),
    })
}

/// Checks `test-results.json`.
pub fn validate_test_results(path: &Path, text: &str) -> Result<ValidatedArtifact, ArtifactInvalid> {
    let map = parse_versioned(path, text)?;
    let results = non_empty_array(&map, "results", path)?;

    let mut counts = [0_u64; RESULT_STATUSES.len()];
    for (i, result) in results.iter().enumerate() {
        if non_empty_str(result, "test").is_none() {
            return Err(ArtifactInvalid::malformed(
                path,
                format!("results[{i}] has no 'test' name"),
            ));
        }
        let status = result.get("status").and_then(Value::as_str).unwrap_or_default();
        let Some(slot) = RESULT_STATUSES.iter().position(|s| *s == status) else {
            return Err(ArtifactInvalid::malformed(
                path,
                format!("results[{i}] has unknown status '{status}'"),
            ));
        };
        counts[slot] += 1;
    }

    if let Some(summary) = map.get("summary") {
        let total = summary.get("total").and_then(Value::as_u64);
        if total.is_some_and(|t| t != results.len() as u64) {
            return Err(ArtifactInvalid::malformed(
                path,
                "summary.total does not match the number of results",
            ));
        }
        for (status, count) in RESULT_STATUSES.iter().zip(counts) {
            if summary
                .get(*status)
                .and_then(Value::as_u64)
                .is_some_and(|declared| declared != count)
            {
                return Err(ArtifactInvalid::malformed(
                    path,
                    format!("summary.{status} does not match the results"),
                ));
            }
        }
    }

    let summary = RESULT_STATUSES
        .iter()
        .zip(counts)
        .filter(|(_, n)| *n > 0)
        .map(|(s, n)| format!("{n} {s}"))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(text_artifact(PipelineStage::RunTests, path, text, summary))
}

#[allow(clippy::expect_used)]
fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^ {0,3}#{1,6}[ \t]+\S").expect("heading pattern is a valid regex")
    })
}

/// Checks `test-report.md`.
pub fn validate_analysis_report(path: &Path, text: &str) -> Result<ValidatedArtifact, ArtifactInvalid> {
    if text.trim().is_empty() {
        return Err(ArtifactInvalid::Empty {
            path: path.to_path_buf(),
        });
    }
    let headings = heading_pattern().find_iter(text).count();
    if headings == 0 {
        return Err(ArtifactInvalid::malformed(
            path,
            "report has no Markdown heading",
        ));
    }

    Ok(text_artifact(
        PipelineStage::AnalyzeResults,
        path,
        text,
        format!("{headings} section(s)"),
    ))
}
