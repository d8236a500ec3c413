//! Shared types: chat request/response, messages exchanged with the model, tool calls,
//! knowledge results, history turns, and the step trace.

use serde::{Deserialize, Serialize};

/// Mood used whenever the knowledge probe has nothing better.
pub const NEUTRAL_MOOD: &str = "NEUTRAL";
/// Fact used whenever the knowledge probe has nothing better.
pub const NO_DATA_FACT: &str = "No data found.";

/// Incoming chat request. `image` is base64-encoded bytes (no `data:` prefix required).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Successful turn result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub steps: Vec<Step>,
}

/// Icon tag shown next to a step in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepIcon {
    Database,
    Brain,
    Eye,
    Globe,
    Sparkles,
    Save,
    Check,
}

/// One entry of the per-request progress trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: u32,
    pub status: String,
    pub icon: StepIcon,
}

/// Append-only step trace; ids are assigned in order starting at 1.
#[derive(Debug, Clone, Default)]
pub struct StepTrace {
    steps: Vec<Step>,
}

impl StepTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, status: impl Into<String>, icon: StepIcon) {
        let id = self.steps.len() as u32 + 1;
        self.steps.push(Step {
            id,
            status: status.into(),
            icon,
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

/// Fact + mood derived from the knowledge probe; lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeResult {
    pub fact: String,
    pub mood: String,
}

impl KnowledgeResult {
    pub fn new(fact: impl Into<String>, mood: impl Into<String>) -> Self {
        Self {
            fact: fact.into(),
            mood: mood.into(),
        }
    }

    /// `{fact: "No data found.", mood: "NEUTRAL"}`.
    pub fn fallback() -> Self {
        Self::new(NO_DATA_FACT, NEUTRAL_MOOD)
    }

    pub fn is_fallback(&self) -> bool {
        self.fact == NO_DATA_FACT && self.mood == NEUTRAL_MOOD
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Argument mapping. Undecodable arguments arrive as `{"raw": "<text>"}`.
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("raw".to_string(), other);
                map
            }
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// String argument by key, trimmed; `None` when absent, non-string, or blank.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Model output for one inference call. `tool_calls` is always present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Image attached to a user message, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// e.g. `image/png`.
    pub media_type: String,
    /// Base64 payload without any `data:` prefix.
    pub base64: String,
}

impl ImageAttachment {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64)
    }
}

/// Unit exchanged with the inference client.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System(String),
    User(String),
    UserMultimodal { text: String, image: ImageAttachment },
    Assistant(AssistantMessage),
    ToolResult { content: String, tool_call_id: String },
}

impl Message {
    pub fn role(&self) -> &'static str {
        match self {
            Message::System(_) => "system",
            Message::User(_) | Message::UserMultimodal { .. } => "user",
            Message::Assistant(_) => "assistant",
            Message::ToolResult { .. } => "tool",
        }
    }
}

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            // Older databases stored the assistant role as "bot".
            "assistant" | "bot" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Persisted history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub sequence: i64,
    pub role: Role,
    pub content: String,
}
