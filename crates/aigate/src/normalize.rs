//! Response normalization.
//!
//! The provider answers in several shapes: OpenAI-style nested choices, a flat
//! `content` field, bare text, raw media bytes, or something else entirely.
//! [`normalize`] classifies the payload first, then renders exactly one string
//! for the caller. It never fails: unrecognized shapes are serialized whole.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::debug;

use crate::response::GatewayResponse;
use crate::upstream::{TaskType, UpstreamPayload};

/// Media type of spoken output embedded in structured chat responses.
const SPOKEN_MEDIA_TYPE: &str = "audio/mpeg";

/// Recognized payload shapes.
#[derive(Debug, PartialEq)]
enum Shape<'a> {
    /// `choices[0].message.content`
    StructuredChat(&'a str),
    /// `choices[0].message.audio.data`, already base64 encoded.
    SpokenChat(&'a str),
    /// Top-level `content`.
    FlatContent(&'a str),
    /// A bare string.
    RawString(&'a str),
    Unknown(&'a Value),
}

fn classify(task: TaskType, value: &Value) -> Shape<'_> {
    let message = value.pointer("/choices/0/message");

    if task == TaskType::Audio
        && let Some(data) = message
            .and_then(|m| m.pointer("/audio/data"))
            .and_then(Value::as_str)
    {
        return Shape::SpokenChat(data);
    }
    if let Some(content) = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    {
        return Shape::StructuredChat(content);
    }
    if let Some(content) = value.get("content").and_then(Value::as_str) {
        return Shape::FlatContent(content);
    }
    if let Value::String(s) = value {
        return Shape::RawString(s);
    }
    Shape::Unknown(value)
}

fn render(shape: Shape<'_>) -> String {
    match shape {
        Shape::StructuredChat(text) | Shape::FlatContent(text) | Shape::RawString(text) => {
            text.to_string()
        }
        Shape::SpokenChat(data) => format!("data:{};base64,{}", SPOKEN_MEDIA_TYPE, data),
        Shape::Unknown(value) => {
            debug!("Unrecognized upstream payload shape, returning it serialized");
            value.to_string()
        }
    }
}

/// Wrap raw bytes as a base64 data URI.
pub fn data_uri(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}

/// Map an upstream payload to the caller-facing envelope.
pub fn normalize(task: TaskType, payload: UpstreamPayload) -> GatewayResponse {
    let data = match payload {
        UpstreamPayload::Json(value) => render(classify(task, &value)),
        UpstreamPayload::Text(text) => match embedded_json(&text) {
            Some(value) => render(classify(task, &value)),
            None => text,
        },
        UpstreamPayload::Binary { bytes, media_type } => data_uri(&media_type, &bytes),
    };
    GatewayResponse::ok(data)
}

/// Text bodies that are really JSON objects (mislabelled content type).
fn embedded_json(text: &str) -> Option<Value> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}
