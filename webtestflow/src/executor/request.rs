//! Request and result types of the execution primitive.

use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Default time budget of one backend call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// The on-disk effect a backend call must have, relative to the work directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpectedOutput {
    /// Query only; no file is expected.
    Nothing,
    /// A single file must be created or changed.
    File(PathBuf),
    /// At least one file under `dir` whose name ends with one of `suffixes`
    /// must be created or changed. Empty `suffixes` accepts any file.
    AnyFileIn {
        /// Directory relative to the work directory.
        dir: PathBuf,
        /// Accepted file name suffixes.
        suffixes: Vec<String>,
    },
}

impl ExpectedOutput {
    /// Returns true if a call with this expectation must write something.
    #[must_use]
    pub const fn expects_write(&self) -> bool {
        !matches!(self, Self::Nothing)
    }

    /// Returns true if `target` (absolute or relative to `work_dir`) is a
    /// path this expectation covers.
    #[must_use]
    pub fn matches(&self, work_dir: &Path, target: &Path) -> bool {
        let target = normalize(&work_dir.join(target));
        match self {
            Self::Nothing => false,
            Self::File(rel) => target == normalize(&work_dir.join(rel)),
            Self::AnyFileIn { dir, suffixes } => {
                let dir = normalize(&work_dir.join(dir));
                target != dir
                    && target.starts_with(&dir)
                    && target
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| suffix_matches(name, suffixes))
            }
        }
    }
}

/// Returns true if `name` ends with one of `suffixes`, or `suffixes` is empty.
pub(crate) fn suffix_matches(name: &str, suffixes: &[String]) -> bool {
    suffixes.is_empty() || suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl fmt::Display for ExpectedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing => f.write_str("nothing"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::AnyFileIn { dir, suffixes } if suffixes.is_empty() => {
                write!(f, "{}/*", dir.display())
            }
            Self::AnyFileIn { dir, suffixes } => {
                write!(f, "{}/*{{{}}}", dir.display(), suffixes.join(","))
            }
        }
    }
}

/// One instruction for the backend.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Short label used in logs, audit file names, and errors.
    pub label: String,
    /// Natural-language instruction sent to the backend.
    pub instruction: String,
    /// The side effect that must be observed on disk.
    pub expected: ExpectedOutput,
    /// Time budget for the call.
    pub timeout: Duration,
}

impl ExecutionRequest {
    /// Creates a query-only request with the default timeout.
    #[must_use]
    pub fn new(label: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instruction: instruction.into(),
            expected: ExpectedOutput::Nothing,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the expected output.
    #[must_use]
    pub fn expecting(mut self, expected: ExpectedOutput) -> Self {
        self.expected = expected;
        self
    }

    /// Sets the time budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of a successful backend call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Unique id of this call, also part of the audit file name.
    pub execution_id: Uuid,
    /// Final response text.
    pub response: String,
    /// True if the expected output was created or changed on disk.
    pub side_effect_confirmed: bool,
    /// True if the stream showed a successful write to the expected output.
    pub write_claimed: bool,
    /// Files under the expected output that were created or changed.
    pub changed_files: Vec<PathBuf>,
    /// Tool error messages observed during the call.
    pub tool_errors: Vec<String>,
    /// Where the raw response was persisted, if persisting succeeded.
    pub audit_path: Option<PathBuf>,
    /// Wall-clock duration of the call in milliseconds.
    pub duration_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_match_resolves_relative_and_absolute() {
        let expected = ExpectedOutput::File("test-results.json".into());
        let work = Path::new("/runs/1");
        assert!(expected.matches(work, Path::new("test-results.json")));
        assert!(expected.matches(work, Path::new("./test-results.json")));
        assert!(expected.matches(work, Path::new("/runs/1/test-results.json")));
        assert!(!expected.matches(work, Path::new("/runs/2/test-results.json")));
        assert!(!expected.matches(work, Path::new("sub/test-results.json")));
    }

    #[test]
    fn test_directory_match_requires_suffix() {
        let expected = ExpectedOutput::AnyFileIn {
            dir: "test-cases".into(),
            suffixes: vec![".spec.ts".into()],
        };
        let work = Path::new("/w");
        assert!(expected.matches(work, Path::new("test-cases/login.spec.ts")));
        assert!(expected.matches(work, Path::new("/w/test-cases/deep/a.spec.ts")));
        assert!(!expected.matches(work, Path::new("test-cases/helpers.ts")));
        assert!(!expected.matches(work, Path::new("test-cases")));
        assert!(!expected.matches(work, Path::new("other/login.spec.ts")));
    }

    #[test]
    fn test_nothing_matches_nothing() {
        assert!(!ExpectedOutput::Nothing.matches(Path::new("/w"), Path::new("a")));
        assert!(!ExpectedOutput::Nothing.expects_write());
    }

    #[test]
    fn test_display() {
        let expected = ExpectedOutput::AnyFileIn {
            dir: "test-cases".into(),
            suffixes: vec![".spec.ts".into(), ".test.ts".into()],
        };
        assert_eq!(expected.to_string(), "test-cases/*{.spec.ts,.test.ts}");
        assert_eq!(
            ExpectedOutput::File("test-report.md".into()).to_string(),
            "test-report.md"
        );
    }

    #[test]
    fn test_request_builder() {
        let request = ExecutionRequest::new("analyze_website", "Analyze it")
            .expecting(ExpectedOutput::File("website-analysis.json".into()))
            .with_timeout(Duration::from_secs(5));
        assert!(request.expected.expects_write());
        assert_eq!(request.timeout, Duration::from_secs(5));
    }
}
