//! Builders for raw stream-json events as the `claude` CLI emits them.

use serde_json::{json, Value};

/// An assistant message with a single text block.
#[must_use]
pub fn text(text: &str) -> Value {
    json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]}
    })
}

/// An assistant message invoking the `Write` tool.
#[must_use]
pub fn write_tool_use(id: &str, file_path: &str, content: &str) -> Value {
    tool_use(id, "Write", json!({"file_path": file_path, "content": content}))
}

/// An assistant message invoking an arbitrary tool.
#[must_use]
pub fn tool_use(id: &str, name: &str, input: Value) -> Value {
    json!({
        "type": "assistant",
        "message": {"content": [{"type": "tool_use", "id": id, "name": name, "input": input}]}
    })
}

/// A user message carrying a failed tool result.
#[must_use]
pub fn tool_error(tool_use_id: &str, message: &str) -> Value {
    json!({
        "type": "user",
        "message": {"content": [{
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "is_error": true,
            "content": message
        }]}
    })
}

/// A successful final result.
#[must_use]
pub fn result_success(result: &str) -> Value {
    json!({"type": "result", "subtype": "success", "is_error": false, "result": result})
}

/// A failed final result.
#[must_use]
pub fn result_error(result: &str) -> Value {
    json!({"type": "result", "subtype": "error_during_execution", "is_error": true, "result": result})
}
