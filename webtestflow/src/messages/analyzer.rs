//! Control-path consumer of interpreted events.

use super::event::ToolEvent;
use crate::errors::BackendError;
use crate::executor::ExpectedOutput;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// How a backend stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A non-error end event was observed.
    Completed,
    /// The backend reported an error or the stream broke.
    Failed(String),
    /// The stream closed without an end event.
    Truncated,
}

/// What the analyzer concluded about one backend call.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    /// Accumulated response text (final result when the backend sent one).
    pub response: String,
    /// True if a write tool targeting the expected output ran without error.
    pub write_claimed: bool,
    /// Messages of every tool error seen.
    pub tool_errors: Vec<String>,
    /// Number of tool invocations seen.
    pub tool_invocations: usize,
    /// How the stream ended.
    pub outcome: StreamOutcome,
}

impl StreamSummary {
    /// Returns true if the stream ended with a non-error end event.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.outcome == StreamOutcome::Completed
    }
}

/// Tracks completion and claimed writes across a stream of [`ToolEvent`]s.
///
/// A write is "claimed" when a write tool targeted the expected output and no
/// error for that tool call followed. The claim alone never confirms a side
/// effect; the executor checks the filesystem separately.
#[derive(Debug)]
pub struct StreamAnalyzer {
    work_dir: PathBuf,
    expected: ExpectedOutput,
    text: String,
    result: Option<String>,
    pending_writes: HashMap<String, PathBuf>,
    failed_calls: HashSet<String>,
    tool_errors: Vec<String>,
    tool_invocations: usize,
    end: Option<StreamOutcome>,
}

impl StreamAnalyzer {
    /// Creates an analyzer for one call.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>, expected: ExpectedOutput) -> Self {
        Self {
            work_dir: work_dir.into(),
            expected,
            text: String::new(),
            result: None,
            pending_writes: HashMap::new(),
            failed_calls: HashSet::new(),
            tool_errors: Vec::new(),
            tool_invocations: 0,
            end: None,
        }
    }

    /// Feeds one event.
    pub fn observe(&mut self, event: &ToolEvent) {
        match event {
            ToolEvent::ToolInvocation { id, target, .. } => {
                self.tool_invocations += 1;
                if !event.is_write() {
                    return;
                }
                if let Some(target) = target {
                    if self.expected.matches(&self.work_dir, target) {
                        self.pending_writes.insert(id.clone(), target.clone());
                    }
                }
            }
            ToolEvent::ToolError { id, message } => {
                if let Some(id) = id {
                    self.failed_calls.insert(id.clone());
                }
                self.tool_errors.push(message.clone());
            }
            ToolEvent::TextDelta { text } => self.text.push_str(text),
            ToolEvent::StreamEnd { success, result } => {
                self.result.clone_from(result);
                if matches!(self.end, Some(StreamOutcome::Failed(_))) {
                    return;
                }
                self.end = Some(if *success {
                    StreamOutcome::Completed
                } else {
                    StreamOutcome::Failed(
                        result
                            .clone()
                            .unwrap_or_else(|| "backend reported an error".to_string()),
                    )
                });
            }
        }
    }

    /// Records a broken stream. Later events are still accepted but the
    /// outcome stays failed.
    pub fn observe_error(&mut self, error: &BackendError) {
        self.end = Some(StreamOutcome::Failed(error.to_string()));
    }

    /// Returns true if a matching write ran without a reported error so far.
    #[must_use]
    pub fn write_claimed(&self) -> bool {
        self.pending_writes
            .keys()
            .any(|id| !self.failed_calls.contains(id))
    }

    /// Consumes the analyzer and returns its conclusion.
    #[must_use]
    pub fn finish(self) -> StreamSummary {
        let write_claimed = self.write_claimed();
        let response = match self.result {
            Some(result) if !result.trim().is_empty() => result,
            _ => self.text,
        };
        StreamSummary {
            response,
            write_claimed,
            tool_errors: self.tool_errors,
            tool_invocations: self.tool_invocations,
            outcome: self.end.unwrap_or(StreamOutcome::Truncated),
        }
    }

    /// Returns the work directory relative paths resolve against.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
