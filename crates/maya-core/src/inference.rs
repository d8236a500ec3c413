//! Inference Client: sends a message list to a chat model and returns a structured
//! [`AssistantMessage`] that may request tool calls.
//!
//! [`OpenAiCompatClient`] speaks the OpenAI-compatible `/chat/completions` protocol, which
//! Ollama, OpenRouter, and most local servers expose. Two instances are built at startup:
//! a text binding with tool declarations and a vision binding without them.

use crate::config::LlmConfig;
use crate::error::InferenceError;
use crate::tools::ToolSpec;
use crate::types::{AssistantMessage, Message, ToolCall};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

/// A model binding. Implementations must be stateless across calls.
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    async fn infer(
        &self,
        messages: &[Message],
        allow_tools: bool,
    ) -> Result<AssistantMessage, InferenceError>;
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiCompatClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    tools: Vec<ToolSpec>,
    /// Construction failure is kept and reported by every `infer` call.
    client: Result<reqwest::Client, String>,
}

impl OpenAiCompatClient {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, timeout: std::time::Duration) -> Self {
        let model = model.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                tracing::error!(target: "maya::llm", %model, error = %e, "HTTP client construction failed");
                e.to_string()
            });
        Self {
            api_url: api_url.into(),
            api_key: None,
            model,
            temperature: 0.0,
            tools: Vec::new(),
            client,
        }
    }

    /// Text binding from config: `llm.text_model`.
    pub fn text_from_config(cfg: &LlmConfig) -> Self {
        Self::new(cfg.api_url.clone(), cfg.text_model.clone(), cfg.timeout())
            .with_api_key(cfg.api_key.clone())
            .with_temperature(cfg.temperature)
    }

    /// Vision binding from config: `llm.vision_model`. Never declares tools.
    pub fn vision_from_config(cfg: &LlmConfig) -> Self {
        Self::new(cfg.api_url.clone(), cfg.vision_model.clone(), cfg.timeout())
            .with_api_key(cfg.api_key.clone())
            .with_temperature(cfg.temperature)
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Tools declared to the model whenever `allow_tools` is true.
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    fn request_body(&self, messages: &[Message], allow_tools: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(encode_message).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "stream": false,
        });
        if allow_tools && !self.tools.is_empty() {
            body["tools"] = Value::Array(self.tools.iter().map(ToolSpec::to_wire).collect());
        }
        body
    }
}

#[async_trait::async_trait]
impl InferenceClient for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn infer(
        &self,
        messages: &[Message],
        allow_tools: bool,
    ) -> Result<AssistantMessage, InferenceError> {
        let client = self
            .client
            .as_ref()
            .map_err(|e| InferenceError::Unavailable(format!("{}: {}", self.model, e)))?;
        let body = self.request_body(messages, allow_tools);
        let mut req = client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(InferenceError::Status {
                code: status.as_u16(),
                body: text,
            });
        }
        decode_response(&text)
    }
}

/// Encodes one message in the OpenAI chat format.
pub fn encode_message(message: &Message) -> Value {
    match message {
        Message::System(content) => json!({ "role": "system", "content": content }),
        Message::User(content) => json!({ "role": "user", "content": content }),
        Message::UserMultimodal { text, image } => json!({
            "role": "user",
            "content": [
                { "type": "text", "text": text },
                { "type": "image_url", "image_url": { "url": image.data_url() } },
            ],
        }),
        Message::Assistant(msg) => {
            let mut v = json!({ "role": "assistant", "content": msg.content });
            if msg.has_tool_calls() {
                v["tool_calls"] = Value::Array(
                    msg.tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": Value::Object(call.arguments.clone()).to_string(),
                                },
                            })
                        })
                        .collect(),
                );
            }
            v
        }
        Message::ToolResult {
            content,
            tool_call_id,
        } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireAssistant,
}

#[derive(Deserialize)]
struct WireAssistant {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Decodes a `/chat/completions` body into an [`AssistantMessage`].
pub fn decode_response(body: &str) -> Result<AssistantMessage, InferenceError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::Decode(e.to_string()))?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| InferenceError::Decode("response has no choices".to_string()))?;

    let wire_calls = message.tool_calls.unwrap_or_default();
    let mut taken: HashSet<String> = wire_calls
        .iter()
        .filter_map(|c| c.id.as_deref())
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .collect();
    let tool_calls = wire_calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| {
            let id = match call.id.filter(|id| !id.trim().is_empty()) {
                Some(id) => id,
                None => synthesize_call_id(i, &mut taken),
            };
            ToolCall::new(id, call.function.name, decode_arguments(call.function.arguments))
        })
        .collect();

    Ok(AssistantMessage::with_tool_calls(
        message.content.unwrap_or_default(),
        tool_calls,
    ))
}

/// `call_<index>`, or the next free `call_<n>` when the model already used that id.
fn synthesize_call_id(index: usize, taken: &mut HashSet<String>) -> String {
    let mut n = index;
    loop {
        let candidate = format!("call_{}", n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Arguments arrive as a JSON string (OpenAI) or an object (Ollama). Anything that is not an
/// object after decoding is kept as `{"raw": ...}` so the tool can report it.
fn decode_arguments(arguments: Value) -> Value {
    match arguments {
        Value::Null => json!({}),
        Value::Object(_) => arguments,
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v @ Value::Object(_)) => v,
            _ => json!({ "raw": s }),
        },
        other => json!({ "raw": other }),
    }
}
