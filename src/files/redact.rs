//! Scrubbing of file content from logged tool-call payloads. File bodies
//! can be large and can contain anything, so recognized file tools get
//! their `content` fields replaced with a size-preserving marker before a
//! payload is ever logged or shipped.

use serde_json::{json, Value};

pub const FILE_TOOL_NAMES: &[&str] = &[
    "file_stat",
    "file_read",
    "file_write",
    "file_delete",
    "file_rename",
    "file_list",
    "file_search",
];

/// Redact a tool-call argument or result payload. Unrecognized tool names
/// pass through untouched; recognized ones get `content` and every
/// `chunks[*].chunk_content` replaced with a marker recording the size.
pub fn redact_tool_payload(tool_name: &str, payload: &Value) -> Value {
    if !FILE_TOOL_NAMES.contains(&tool_name) {
        return payload.clone();
    }
    let mut redacted = payload.clone();
    if let Value::Object(fields) = &mut redacted {
        if let Some(content) = fields.get("content") {
            let bytes = value_bytes(content);
            fields.insert("content".to_owned(), marker(bytes));
        }
        if let Some(Value::Array(chunks)) = fields.get_mut("chunks") {
            for chunk in chunks {
                if let Value::Object(chunk_fields) = chunk {
                    if let Some(content) = chunk_fields.get("chunk_content") {
                        let bytes = value_bytes(content);
                        chunk_fields.insert("chunk_content".to_owned(), marker(bytes));
                    }
                }
            }
        }
    }
    redacted
}

fn value_bytes(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    }
}

fn marker(bytes: usize) -> Value {
    json!({
        "redacted": true,
        "bytes": bytes,
        "preview": format!("<redacted:{bytes}>"),
    })
}
