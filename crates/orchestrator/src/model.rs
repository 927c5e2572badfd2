use std::{fmt, pin::Pin};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio_stream::Stream,
    tokio_util::sync::CancellationToken,
};

// ── Roles ───────────────────────────────────────────────────────────────────

/// Speaker of a message or output event.
///
/// `Custom` carries out-of-band roles such as the status "tip" role that tool
/// handlers use to report progress to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Custom(role) => role,
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value {
            "system" => Self::System,
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Typed chat messages ─────────────────────────────────────────────────────

/// One conversation turn as sent to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
    /// Out-of-band message under a caller-defined role (e.g. "tip").
    Custom {
        role: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Create an assistant message with text only (no tool calls).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: vec![],
        }
    }

    /// Create an assistant message recording a tool-call batch.
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content,
            tool_calls,
        }
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
            Self::Custom { role, .. } => Role::from(role.as_str()),
        }
    }

    /// Text content, empty for assistant tool-call turns without text.
    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Tool { content, .. }
            | Self::Custom { content, .. } => content,
            Self::Assistant { content, .. } => content.as_deref().unwrap_or(""),
        }
    }

    /// Convert to OpenAI-compatible JSON format.
    #[must_use]
    pub fn to_openai_value(&self) -> serde_json::Value {
        match self {
            ChatMessage::System { content } => {
                serde_json::json!({ "role": "system", "content": content })
            },
            ChatMessage::User { content } => {
                serde_json::json!({ "role": "user", "content": content })
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                if tool_calls.is_empty() {
                    serde_json::json!({
                        "role": "assistant",
                        "content": content.as_deref().unwrap_or(""),
                    })
                } else {
                    let tc_json: Vec<serde_json::Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments,
                                }
                            })
                        })
                        .collect();
                    let mut msg = serde_json::json!({
                        "role": "assistant",
                        "tool_calls": tc_json,
                    });
                    if let Some(text) = content {
                        msg["content"] = serde_json::Value::String(text.clone());
                    }
                    msg
                }
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => {
                serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                })
            },
            ChatMessage::Custom { role, content } => {
                serde_json::json!({ "role": role, "content": content })
            },
        }
    }
}

/// A completed tool invocation request.
///
/// `arguments` is the raw JSON text exactly as concatenated from the stream;
/// handlers read it through [`crate::args::Args`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

// ── Provider requests and stream chunks ─────────────────────────────────────

/// A full chat request: the conversation so far plus request metadata.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Tool schemas as `{name, description, parameters}` objects.
    pub tools: Vec<serde_json::Value>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// One tool-call fragment carried by a stream chunk.
///
/// A non-empty `id` marks the start of a new call; an empty `id` means the
/// `arguments` text continues the most recently started call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: Option<usize>,
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One incremental event from a provider stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    pub role: Option<Role>,
    pub content: String,
    pub tool_calls: Vec<ToolCallDelta>,
}

impl ChatChunk {
    /// A plain text delta.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// A fragment that starts a new tool call.
    pub fn tool_call_start(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            tool_calls: vec![ToolCallDelta {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// A continuation fragment appending to the current tool call's arguments.
    pub fn tool_call_args(arguments: impl Into<String>) -> Self {
        Self {
            tool_calls: vec![ToolCallDelta {
                arguments: arguments.into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

/// Stream of chunks for one provider call. An `Err` item is a transport
/// failure; the stream ending normally is `None`.
pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatChunk>> + Send>>;

/// Streaming chat provider (OpenAI-compatible endpoints, test doubles, ...).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier (e.g. "gpt-4o-mini").
    fn id(&self) -> &str;

    /// Open a completion stream for `request`.
    ///
    /// Returning `Err` means the stream could not be started at all; failures
    /// after the first chunk are reported as `Err` items on the stream.
    async fn stream(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ChunkStream>;
}

// ── Output events ───────────────────────────────────────────────────────────

/// Role used for out-of-band status events unless a run overrides it.
pub const DEFAULT_TIP_ROLE: &str = "tip";

/// An event visible to the caller: assistant content or an out-of-band tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub role: Role,
    pub content: String,
}

impl OutputEvent {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Status event under `tip_role`; trailing newlines collapse to exactly one.
    pub fn tip(tip_role: &str, content: impl AsRef<str>) -> Self {
        let mut text = content.as_ref().trim_end_matches('\n').to_string();
        text.push('\n');
        Self {
            role: Role::from(tip_role),
            content: text,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}
