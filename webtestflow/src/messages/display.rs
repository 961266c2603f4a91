//! Presentation-path consumer of interpreted events.
//!
//! Rendering never influences control decisions; the executor only emits the
//! lines to its event sink.

use super::event::ToolEvent;

const MAX_LINE_CHARS: usize = 200;

/// Renders one event as a single transcript line.
///
/// Returns `None` for events with nothing to show (e.g. whitespace deltas).
#[must_use]
pub fn render_event(event: &ToolEvent) -> Option<String> {
    match event {
        ToolEvent::ToolInvocation { name, target, .. } => Some(match target {
            Some(target) => format!("[tool] {name} {}", target.display()),
            None => format!("[tool] {name}"),
        }),
        ToolEvent::ToolError { message, .. } => {
            Some(format!("[tool error] {}", first_line(message)))
        }
        ToolEvent::TextDelta { text } => {
            let text = text.trim();
            (!text.is_empty()).then(|| format!("[text] {}", first_line(text)))
        }
        ToolEvent::StreamEnd { success: true, .. } => Some("[end] finished".to_string()),
        ToolEvent::StreamEnd {
            success: false,
            result,
        } => Some(format!(
            "[end] failed: {}",
            first_line(result.as_deref().unwrap_or("no details"))
        )),
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > MAX_LINE_CHARS {
        let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

/// Accumulated human-readable transcript of one call.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    /// Creates an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders and appends an event, returning the new line if any.
    pub fn push(&mut self, event: &ToolEvent) -> Option<&str> {
        let line = render_event(event)?;
        self.lines.push(line);
        self.lines.last().map(String::as_str)
    }

    /// Returns the rendered lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns the transcript as one newline-joined string.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_render_tool_invocation() {
        let event = ToolEvent::ToolInvocation {
            id: "t1".into(),
            name: "Write".into(),
            target: Some(PathBuf::from("test-report.md")),
            input: serde_json::json!({}),
        };
        assert_eq!(
            render_event(&event).as_deref(),
            Some("[tool] Write test-report.md")
        );
    }

    #[test]
    fn test_blank_text_is_skipped() {
        assert!(render_event(&ToolEvent::TextDelta { text: "  \n".into() }).is_none());
    }

    #[test]
    fn test_long_lines_are_cut() {
        let line = render_event(&ToolEvent::TextDelta {
            text: "x".repeat(500),
        })
        .unwrap();
        assert!(line.ends_with("..."));
        assert!(line.len() < 250);
    }

    #[test]
    fn test_transcript_collects_lines() {
        let mut transcript = Transcript::new();
        transcript.push(&ToolEvent::TextDelta { text: "one".into() });
        transcript.push(&ToolEvent::TextDelta { text: " ".into() });
        transcript.push(&ToolEvent::StreamEnd {
            success: true,
            result: None,
        });
        assert_eq!(transcript.lines().len(), 2);
        assert_eq!(transcript.render(), "[text] one\n[end] finished");
    }
}
