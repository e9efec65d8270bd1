use async_trait::async_trait;
use futures_util::StreamExt;
use memchr::memchr;
use tracing::{debug, warn};

use crate::api::{ChatRequest, ChatStreamEvent};
use crate::core::constants::SEGMENT_BUFFER_EVENTS;
use crate::core::message::Message;
use crate::core::providers::ModelConfig;
use crate::core::relay::{
    BackendError, FinishReason, GenerationBackend, SegmentSource, SegmentWriter,
};
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

/// One parsed server-sent-events line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SseLine {
    Ignore,
    Delta {
        content: Option<String>,
        finish: Option<FinishReason>,
    },
    Done,
    Error(String),
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn parse_data_payload(payload: &str) -> SseLine {
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    if payload.trim().is_empty() {
        return SseLine::Ignore;
    }

    match serde_json::from_str::<ChatStreamEvent>(payload) {
        Ok(response) => match response.choices.into_iter().next() {
            Some(choice) => SseLine::Delta {
                content: choice
                    .delta
                    .and_then(|delta| delta.content)
                    .filter(|content| !content.is_empty()),
                finish: choice.finish_reason.as_deref().map(FinishReason::parse),
            },
            None => SseLine::Ignore,
        },
        Err(_) => SseLine::Error(format_api_error(payload)),
    }
}

fn parse_sse_line(line: &str) -> SseLine {
    extract_data_payload(line)
        .map(parse_data_payload)
        .unwrap_or(SseLine::Ignore)
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Render a provider error body for humans, pretty-printing JSON and
/// leading with the provider's own message when there is one.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            return match extract_error_summary(&json_value) {
                Some(summary) => format!("API Error: {summary}\n```json\n{pretty_json}\n```"),
                None => format!("API Error:\n```json\n{pretty_json}\n```"),
            };
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{trimmed}\n```")
    } else {
        format!("API Error:\n```\n{trimmed}\n```")
    }
}

/// Streams chat completions from any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatStreamBackend {
    client: reqwest::Client,
    buffer: usize,
}

impl ChatStreamBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            buffer: SEGMENT_BUFFER_EVENTS,
        }
    }

    /// Change how many events may queue between the HTTP reader and the
    /// relay.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }
}

#[async_trait]
impl GenerationBackend for ChatStreamBackend {
    async fn generate(
        &self,
        history: &[Message],
        config: &ModelConfig,
    ) -> Result<SegmentSource, BackendError> {
        let request = ChatRequest {
            model: &config.model,
            messages: history.iter().map(Message::to_api).collect(),
            stream: true,
            max_tokens: config.max_tokens,
        };

        let chat_url = construct_api_url(&config.base_url, "chat/completions");
        debug!(url = %chat_url, model = %config.model, messages = history.len(), "requesting segment");
        let http_request = self
            .client
            .post(chat_url)
            .header("Content-Type", "application/json");
        let http_request = add_auth_headers(http_request, config.auth_mode, &config.api_key);

        let response = http_request
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::new(format_api_error(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(BackendError::with_status(
                status.as_u16(),
                format_api_error(&error_text),
            ));
        }

        let (writer, source) = SegmentSource::channel(self.buffer);
        tokio::spawn(pump_events(response, writer));
        Ok(source)
    }
}

/// Read the SSE body and push parsed events until `[DONE]`, an error, the
/// end of the body, or a stop request.
fn decode_line(raw: &[u8]) -> SseLine {
    match std::str::from_utf8(raw) {
        Ok(s) => parse_sse_line(s.trim()),
        Err(e) => {
            warn!(error = %e, "skipping SSE line with invalid UTF-8");
            SseLine::Ignore
        }
    }
}

/// Apply one parsed line to the segment. Returns false once the segment
/// has ended, either terminally or because the relay stopped listening.
async fn apply_line(
    writer: &SegmentWriter,
    line: SseLine,
    last_finish: &mut Option<FinishReason>,
) -> bool {
    match line {
        SseLine::Ignore => true,
        SseLine::Delta { content, finish } => {
            if let Some(content) = content {
                if !writer.chunk(content).await {
                    return false;
                }
            }
            if finish.is_some() {
                *last_finish = finish;
            }
            true
        }
        SseLine::Done => {
            writer.clone().finish(last_finish.take().unwrap_or(FinishReason::Stop)).await;
            false
        }
        SseLine::Error(message) => {
            writer.clone().fail(BackendError::new(message)).await;
            false
        }
    }
}

async fn pump_events(response: reqwest::Response, writer: SegmentWriter) {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut last_finish: Option<FinishReason> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = writer.stopped() => {
                debug!("segment stopped by relay; dropping HTTP stream");
                return;
            }
            next = stream.next() => next,
        };

        let chunk_bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                writer
                    .fail(BackendError::new(format!("stream interrupted: {e}")))
                    .await;
                return;
            }
            None => break,
        };
        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let line = decode_line(&buffer[..newline_pos]);
            buffer.drain(..=newline_pos);
            if !apply_line(&writer, line, &mut last_finish).await {
                return;
            }
        }
    }

    // Some servers close the body without a trailing newline or [DONE].
    if !buffer.is_empty() {
        let line = decode_line(&buffer);
        if !apply_line(&writer, line, &mut last_finish).await {
            return;
        }
    }
    writer.finish(last_finish.unwrap_or(FinishReason::Stop)).await;
}
