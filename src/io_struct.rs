use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const DEFAULT_SESSION_ID: &str = "default";
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const MODEL: &str = "mistral-small-24b-w8a8";
pub const TEMPERATURE: f32 = 0.7;
pub const MAX_TOKENS: u32 = 2048;

pub const DONE_SENTINEL: &str = "[DONE]";

/// Body of `POST /api/chat`. Fields stay loosely typed so that a wrong type is
/// reported as a missing message rather than a body parse failure.
#[derive(Debug, Default, Deserialize)]
pub struct ChatReqInput {
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<Value>,
}

impl ChatReqInput {
    pub fn message(&self) -> Option<&str> {
        match &self.message {
            Some(Value::String(message)) if !message.is_empty() => Some(message),
            _ => None,
        }
    }

    pub fn session_id(&self) -> &str {
        match &self.session_id {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => DEFAULT_SESSION_ID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Turn {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Turn {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Request body sent to `{endpoint}/chat/completions`.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: &'static str,
    pub messages: Vec<Turn>,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatCompletionRequest {
    pub fn new(history: &[Turn]) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Turn::system(SYSTEM_PROMPT));
        messages.extend(history.iter().cloned());
        ChatCompletionRequest {
            model: MODEL,
            messages,
            stream: true,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        }
    }
}

/// The subset of an upstream streaming chunk the relay reads.
#[derive(Debug, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .filter(|content| !content.is_empty())
    }
}

/// One downstream server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatFrame {
    Content(String),
    Error(String),
    Done,
    /// Literal `data: [DONE]`, only sent after a configuration error.
    Sentinel,
}

impl ChatFrame {
    pub fn to_json(&self) -> Option<Value> {
        match self {
            ChatFrame::Content(content) => Some(json!({ "content": content })),
            ChatFrame::Error(error) => Some(json!({ "error": error })),
            ChatFrame::Done => Some(json!({ "done": true })),
            ChatFrame::Sentinel => None,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let payload = match self.to_json() {
            Some(value) => value.to_string(),
            None => DONE_SENTINEL.to_string(),
        };
        Bytes::from(format!("data: {}\n\n", payload))
    }
}
