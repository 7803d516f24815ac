//! Request, payload and catalog types shared across the gateway.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Gateway request
// ============================================================================

/// Task family requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Chat,
    Image,
    Audio,
}

impl TaskType {
    /// Parse the wire name. Unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(TaskType::Chat),
            "image" => Some(TaskType::Image),
            "audio" => Some(TaskType::Audio),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Chat => "chat",
            TaskType::Image => "image",
            TaskType::Audio => "audio",
        }
    }

    /// Only text-style tasks may use the plain GET fallback.
    pub fn supports_fallback(self) -> bool {
        matches!(self, TaskType::Chat)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated inbound task.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub task: TaskType,
    pub prompt: Option<String>,
    pub options: Map<String, Value>,
}

impl GatewayRequest {
    pub fn new(task: TaskType, prompt: impl Into<String>) -> Self {
        Self {
            task,
            prompt: Some(prompt.into()),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Prompt text, ignoring blank prompts.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// String option, ignoring blank values.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Caller-supplied message list, when `options.messages` is a non-empty array.
    pub fn messages(&self) -> Option<&[Value]> {
        self.options
            .get("messages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .filter(|m| !m.is_empty())
    }

    /// Messages for a structured chat call.
    ///
    /// Caller-supplied messages are passed through untouched. Otherwise an
    /// optional `system` option and the prompt become a two-message
    /// conversation.
    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        if let Some(messages) = self.messages() {
            return messages.iter().cloned().map(ChatMessage::Raw).collect();
        }

        let mut messages = Vec::new();
        if let Some(system) = self.option_str("system") {
            messages.push(ChatMessage::Text(Message {
                role: Role::System,
                content: system.to_string(),
            }));
        }
        if let Some(prompt) = self.prompt() {
            messages.push(ChatMessage::Text(Message {
                role: Role::User,
                content: prompt.to_string(),
            }));
        }
        messages
    }

    /// Single plain-text query for the fallback transport: the prompt, or the
    /// text of the last user message.
    pub fn plain_query(&self) -> Option<String> {
        if let Some(prompt) = self.prompt() {
            return Some(prompt.to_string());
        }

        self.messages()?
            .iter()
            .rev()
            .filter(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .find_map(|m| message_text(m.get("content")?))
    }
}

/// Text of a message content field, either a string or an array of text parts.
fn message_text(content: &Value) -> Option<String> {
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

// ============================================================================
// Structured chat request
// ============================================================================

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// The role of a message sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Either a message the gateway built or one the caller supplied verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChatMessage {
    Text(Message),
    Raw(Value),
}

/// A chat completion request (OpenAI-compatible format).
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOutput>,
    /// Whitelisted sampling options copied from the caller.
    #[serde(flatten)]
    pub sampling: Map<String, Value>,
}

/// Requested spoken output for audio tasks.
#[derive(Debug, Serialize)]
pub struct AudioOutput {
    pub voice: String,
    pub format: String,
}

// ============================================================================
// Upstream payload
// ============================================================================

/// Raw body returned by the provider, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamPayload {
    Json(Value),
    Text(String),
    Binary { bytes: Bytes, media_type: String },
}

impl UpstreamPayload {
    /// Decode a response body according to its media type.
    ///
    /// `media_type` is expected without parameters and lowercased.
    pub fn from_body(media_type: Option<&str>, bytes: Bytes) -> Self {
        match media_type {
            Some(t) if is_binary_media(t) => UpstreamPayload::Binary {
                bytes,
                media_type: t.to_string(),
            },
            Some(t) if t.ends_with("json") => match serde_json::from_slice(&bytes) {
                Ok(value) => UpstreamPayload::Json(value),
                Err(_) => UpstreamPayload::Text(String::from_utf8_lossy(&bytes).into_owned()),
            },
            _ => UpstreamPayload::Text(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

fn is_binary_media(media_type: &str) -> bool {
    media_type.starts_with("image/")
        || media_type.starts_with("audio/")
        || media_type == "application/octet-stream"
}

// ============================================================================
// Model catalog
// ============================================================================

/// Model identifiers the provider offers, per task family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub image: Vec<String>,
    pub text: Vec<String>,
}

/// Extract model names from a provider listing.
///
/// Accepts a bare array or an object with a `data` array; entries may be
/// strings or objects carrying `name` or `id`.
pub(crate) fn model_names(listing: &Value) -> Vec<String> {
    let entries = match listing {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("data").and_then(Value::as_array) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(name.clone()),
            Value::Object(obj) => obj
                .get("name")
                .or_else(|| obj.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}
