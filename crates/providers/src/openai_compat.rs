//! Shared helpers for OpenAI-compatible Chat Completions endpoints: tool
//! schema conversion and SSE line parsing.

use {
    funcall_orchestrator::{ChatChunk, Role, ToolCallDelta},
    serde::Serialize,
    tracing::trace,
};

/// Tool entry in Chat Completions format.
#[derive(Debug, Serialize)]
pub struct ChatCompletionsTool {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: ChatCompletionsFunction,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionsFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Convert registry schemas (`{name, description, parameters}`) into the
/// nested `{ "type": "function", "function": {...} }` shape. Entries without
/// a name are skipped.
pub fn to_openai_tools(tools: &[serde_json::Value]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .filter_map(|t| {
            let name = t["name"].as_str()?.to_string();
            let parameters = match &t["parameters"] {
                serde_json::Value::Null => {
                    serde_json::json!({ "type": "object", "properties": {} })
                },
                params => params.clone(),
            };
            let tool = ChatCompletionsTool {
                tool_type: "function",
                function: ChatCompletionsFunction {
                    description: t["description"].as_str().unwrap_or("").to_string(),
                    name,
                    parameters,
                },
            };
            serde_json::to_value(tool).ok()
        })
        .collect()
}

/// Result of processing a single SSE line.
#[derive(Debug, PartialEq)]
pub enum SseLineResult {
    /// Not a data line, unparseable, or carrying nothing we forward.
    Skip,
    /// The `[DONE]` sentinel.
    Done,
    Chunk(ChatChunk),
}

/// Strip the `data:` prefix from a raw SSE line.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .map(str::trim)
}

/// Parse the payload of one `data:` line into a chunk.
///
/// Only the first choice is read. Tool-call fragments keep the provider's id
/// as-is (empty on continuation fragments); merging is left to the caller.
pub fn process_openai_sse_line(data: &str) -> SseLineResult {
    if data == "[DONE]" {
        return SseLineResult::Done;
    }

    let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
        trace!(data, "skipping unparseable SSE payload");
        return SseLineResult::Skip;
    };

    let delta = &evt["choices"][0]["delta"];
    if delta.is_null() {
        return SseLineResult::Skip;
    }

    let mut chunk = ChatChunk {
        role: delta["role"].as_str().map(Role::from),
        content: delta["content"].as_str().unwrap_or_default().to_string(),
        ..Default::default()
    };

    if let Some(tcs) = delta["tool_calls"].as_array() {
        for tc in tcs {
            chunk.tool_calls.push(ToolCallDelta {
                index: tc["index"].as_u64().map(|i| i as usize),
                id: tc["id"].as_str().unwrap_or_default().to_string(),
                name: tc["function"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    if chunk.content.is_empty() && chunk.tool_calls.is_empty() {
        return SseLineResult::Skip;
    }
    SseLineResult::Chunk(chunk)
}
