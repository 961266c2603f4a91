//! Typed events of one backend call.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tool names that write files.
pub const WRITE_TOOLS: [&str; 6] = [
    "Write",
    "Edit",
    "MultiEdit",
    "NotebookEdit",
    "write_file",
    "create_file",
];

/// An interpreted item of the backend event stream.
///
/// Events are transient: they live for one backend call and are never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// The backend asked a tool to act (e.g. write a file).
    ToolInvocation {
        /// The tool call id, used to match later errors.
        id: String,
        /// The tool name.
        name: String,
        /// The file the tool targets, if any.
        target: Option<PathBuf>,
        /// The raw tool input.
        input: serde_json::Value,
    },
    /// A tool invocation failed.
    ToolError {
        /// The id of the failed tool call, if reported.
        id: Option<String>,
        /// The error message.
        message: String,
    },
    /// Incremental response text.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// The backend finished the call.
    StreamEnd {
        /// Whether the backend reported success.
        success: bool,
        /// The final result text, if any.
        result: Option<String>,
    },
}

impl ToolEvent {
    /// Returns true for an invocation of a file-writing tool.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::ToolInvocation { name, .. } if WRITE_TOOLS.contains(&name.as_str()))
    }

    /// Returns a short name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ToolInvocation { .. } => "tool_invocation",
            Self::ToolError { .. } => "tool_error",
            Self::TextDelta { .. } => "text_delta",
            Self::StreamEnd { .. } => "stream_end",
        }
    }
}
