//! Client request, upstream payload and streaming chunk types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message. Unknown fields sent by the client are dropped.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Body accepted by the relay endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Credential string overriding the configured pool for this request.
    pub key: Option<String>,
    pub temperature: Option<f32>,
    pub password: Option<String>,
    pub model: Option<String>,
}

impl ChatRequest {
    /// The message the interceptor checks.
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// Payload forwarded upstream. Always streaming.
#[derive(Debug, Serialize)]
pub struct UpstreamRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl<'a> From<&'a ChatRequest> for UpstreamRequest<'a> {
    fn from(request: &'a ChatRequest) -> Self {
        Self {
            model: request.model.as_deref(),
            messages: &request.messages,
            temperature: request.temperature,
            stream: true,
        }
    }
}

/// One streamed completion chunk.
///
/// Held as loose JSON: any well-formed payload is accepted, and only the
/// first choice's `delta.content` is read.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct ChatCompletionChunk(Value);

impl ChatCompletionChunk {
    /// Incremental text of the first choice, if any.
    ///
    /// Any other non-null value is rendered as its JSON text (`5`, `true`);
    /// `null` and absent paths yield `None`.
    pub fn first_content(mut self) -> Option<String> {
        match self.0.pointer_mut("/choices/0/delta/content").map(Value::take)? {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        }
    }
}
