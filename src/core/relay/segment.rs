//! Segment sources and the generation backend seam.
//!
//! A segment is one bounded generation response. Producers push events
//! through a [`SegmentWriter`]; the relay consumes them from the matching
//! [`SegmentSource`]. Both halves share a stop token so the relay can tell
//! a producer to quit without waiting for it to notice a closed channel.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::BackendError;
use crate::core::message::Message;
use crate::core::providers::ModelConfig;

/// Why the backend stopped producing a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other(String),
}

impl FinishReason {
    /// Parse a provider-reported finish reason. Anthropic-style names are
    /// accepted too since several compatible gateways pass them through.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" | "refusal" => FinishReason::ContentFilter,
            "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "error" => FinishReason::Error,
            _ => FinishReason::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Error => "error",
            FinishReason::Other(raw) => raw,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, FinishReason::Length)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    Chunk(String),
    Finished(FinishReason),
    Failed(BackendError),
}

/// Consumer half of a segment.
#[derive(Debug)]
pub struct SegmentSource {
    events: mpsc::Receiver<SegmentEvent>,
    stop: CancellationToken,
}

impl SegmentSource {
    /// Create a connected writer/source pair. `capacity` bounds how far the
    /// producer may run ahead of the relay.
    pub fn channel(capacity: usize) -> (SegmentWriter, SegmentSource) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stop = CancellationToken::new();
        (
            SegmentWriter {
                tx,
                stop: stop.clone(),
            },
            SegmentSource { events: rx, stop },
        )
    }

    pub async fn next_event(&mut self) -> Option<SegmentEvent> {
        self.events.recv().await
    }

    /// Take an already-buffered event without waiting.
    pub fn try_next_event(&mut self) -> Option<SegmentEvent> {
        self.events.try_recv().ok()
    }

    /// Ask the producer to stop. Buffered events remain readable.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

/// Producer half of a segment.
#[derive(Debug, Clone)]
pub struct SegmentWriter {
    tx: mpsc::Sender<SegmentEvent>,
    stop: CancellationToken,
}

impl SegmentWriter {
    /// Push a chunk, waiting while the relay is backed up. Returns false once
    /// the producer should give up: the relay asked it to stop or hung up.
    pub async fn chunk(&self, text: impl Into<String>) -> bool {
        self.send(SegmentEvent::Chunk(text.into())).await
    }

    pub async fn finish(self, reason: FinishReason) {
        self.send(SegmentEvent::Finished(reason)).await;
    }

    pub async fn fail(self, error: BackendError) {
        self.send(SegmentEvent::Failed(error)).await;
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the relay asks this producer to stop.
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    async fn send(&self, event: SegmentEvent) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}

/// Anything that can turn a conversation into a new streaming segment.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        history: &[Message],
        config: &ModelConfig,
    ) -> Result<SegmentSource, BackendError>;
}
