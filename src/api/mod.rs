//! Wire types for the OpenAI-compatible chat completions endpoint.
//!
//! Requests borrow from the relay's history so each segment is serialized
//! without copying the conversation.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub stream: bool,
    pub max_tokens: u32,
}

/// One `data:` event of a streamed completion. Payloads without `choices`
/// (provider error objects) fail to parse.
#[derive(Deserialize, Debug)]
pub struct ChatStreamEvent {
    pub choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Option<StreamDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}
