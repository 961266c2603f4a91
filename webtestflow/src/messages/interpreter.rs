//! Classification of raw stream-json events into [`ToolEvent`]s.
//!
//! The backend emits one JSON object per line. The shapes recognized here:
//! - `assistant` messages whose content holds `text` and `tool_use` blocks
//! - `user` messages whose content holds `tool_result` blocks
//! - `stream_event` wrappers around `content_block_delta` text deltas
//! - a final `result` object
//!
//! Anything else is ignored.

use super::event::ToolEvent;
use crate::errors::BackendError;
use crate::executor::RawEventStream;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::path::PathBuf;

/// Stream of interpreted events.
pub type ToolEventStream = BoxStream<'static, Result<ToolEvent, BackendError>>;

/// Input keys that name the file a tool acts on.
const TARGET_KEYS: [&str; 3] = ["file_path", "path", "notebook_path"];

/// Classifies one raw backend event.
///
/// A single raw event may carry several content blocks, so the result is a
/// list. Unrecognized events produce an empty list.
#[must_use]
pub fn classify(raw: &Value) -> Vec<ToolEvent> {
    match raw.get("type").and_then(Value::as_str) {
        Some("assistant") => content_blocks(raw)
            .filter_map(classify_assistant_block)
            .collect(),
        Some("user") => content_blocks(raw)
            .filter_map(classify_tool_result)
            .collect(),
        Some("stream_event") => raw
            .get("event")
            .and_then(text_delta)
            .into_iter()
            .collect(),
        Some("content_block_delta") => text_delta(raw).into_iter().collect(),
        Some("result") => vec![classify_result(raw)],
        Some("error") => vec![ToolEvent::StreamEnd {
            success: false,
            result: raw
                .pointer("/error/message")
                .or_else(|| raw.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }],
        _ => Vec::new(),
    }
}

/// Interprets a raw backend stream as a stream of [`ToolEvent`]s.
///
/// Backend errors pass through unchanged.
#[must_use]
pub fn interpret(raw: RawEventStream) -> ToolEventStream {
    raw.flat_map(|item| {
        let events: Vec<Result<ToolEvent, BackendError>> = match item {
            Ok(value) => classify(&value).into_iter().map(Ok).collect(),
            Err(err) => vec![Err(err)],
        };
        stream::iter(events)
    })
    .boxed()
}

fn content_blocks(raw: &Value) -> impl Iterator<Item = &Value> {
    raw.pointer("/message/content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn classify_assistant_block(block: &Value) -> Option<ToolEvent> {
    match block.get("type").and_then(Value::as_str)? {
        "tool_use" => {
            let input = block.get("input").cloned().unwrap_or(Value::Null);
            let target = TARGET_KEYS
                .iter()
                .find_map(|key| input.get(*key).and_then(Value::as_str))
                .map(PathBuf::from);
            Some(ToolEvent::ToolInvocation {
                id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                target,
                input,
            })
        }
        "text" => {
            let text = block.get("text").and_then(Value::as_str)?;
            Some(ToolEvent::TextDelta {
                text: text.to_string(),
            })
        }
        _ => None,
    }
}

fn classify_tool_result(block: &Value) -> Option<ToolEvent> {
    if block.get("type").and_then(Value::as_str) != Some("tool_result") {
        return None;
    }
    if !block
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return None;
    }
    Some(ToolEvent::ToolError {
        id: block
            .get("tool_use_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        message: tool_result_text(block.get("content")),
    })
}

/// Tool result content is either a plain string or a list of text blocks.
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::from("tool reported an error"),
    }
}

fn text_delta(event: &Value) -> Option<ToolEvent> {
    if event.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return None;
    }
    let delta = event.get("delta")?;
    if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
        return None;
    }
    let text = delta.get("text").and_then(Value::as_str)?;
    Some(ToolEvent::TextDelta {
        text: text.to_string(),
    })
}

fn classify_result(raw: &Value) -> ToolEvent {
    let is_error = raw.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let subtype_ok = raw
        .get("subtype")
        .and_then(Value::as_str)
        .map_or(true, |subtype| subtype == "success");
    ToolEvent::StreamEnd {
        success: !is_error && subtype_ok,
        result: raw.get("result").and_then(Value::as_str).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::claude_events;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_classify_write_tool_use() {
        let raw = claude_events::write_tool_use("t1", "website-analysis.json", "{}");
        let events = classify(&raw);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ToolEvent::ToolInvocation { id, name, target, .. } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "Write");
                assert_eq!(target.as_deref(), Some(std::path::Path::new("website-analysis.json")));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events[0].is_write());
    }

    #[test]
    fn test_classify_mixed_assistant_content() {
        let raw = json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "text", "text": "Writing the file now."},
                {"type": "tool_use", "id": "t2", "name": "Read", "input": {"file_path": "a.txt"}}
            ]}
        });
        let events = classify(&raw);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ToolEvent::TextDelta {
                text: "Writing the file now.".into()
            }
        );
        assert!(!events[1].is_write());
    }

    #[test]
    fn test_classify_tool_error() {
        let raw = claude_events::tool_error("t1", "permission denied");
        assert_eq!(
            classify(&raw),
            vec![ToolEvent::ToolError {
                id: Some("t1".into()),
                message: "permission denied".into()
            }]
        );
    }

    #[test]
    fn test_successful_tool_result_is_ignored() {
        let raw = json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "ok"}
            ]}
        });
        assert!(classify(&raw).is_empty());
    }

    #[test]
    fn test_classify_stream_delta() {
        let raw = json!({
            "type": "stream_event",
            "event": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "par"}}
        });
        assert_eq!(classify(&raw), vec![ToolEvent::TextDelta { text: "par".into() }]);
    }

    #[test]
    fn test_classify_result() {
        assert_eq!(
            classify(&claude_events::result_success("done")),
            vec![ToolEvent::StreamEnd {
                success: true,
                result: Some("done".into())
            }]
        );
        match &classify(&claude_events::result_error("boom"))[0] {
            ToolEvent::StreamEnd { success, .. } => assert!(!success),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        assert!(classify(&json!({"type": "system", "subtype": "init"})).is_empty());
        assert!(classify(&json!({"no_type": true})).is_empty());
    }

    #[tokio::test]
    async fn test_interpret_flattens_and_passes_errors() {
        let raw: RawEventStream = stream::iter(vec![
            Ok(claude_events::text("hello")),
            Err(BackendError::Io("pipe closed".into())),
        ])
        .boxed();
        let items: Vec<_> = interpret(raw).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Err(BackendError::Io("pipe closed".into())));
    }
}
