use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::channel::{OutputChannel, RelayStream};
use super::controller::{ContinuationController, RelayReport};
use super::counter::SegmentCounter;
use super::error::{BackendError, RelayError};
use super::segment::GenerationBackend;
use crate::core::constants::{CONTINUE_PROMPT, MAX_RESPONSE_SEGMENTS, OUTPUT_BUFFER_CHUNKS};
use crate::core::message::Message;
use crate::core::providers::ModelConfig;

/// Per-session relay settings. Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Continuation hand-offs permitted after the initial segment.
    pub max_response_segments: u32,
    /// User turn appended after a truncated assistant partial.
    pub continue_prompt: String,
    /// Chunks that may queue for the consumer before forwarding pauses.
    pub output_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_response_segments: MAX_RESPONSE_SEGMENTS,
            continue_prompt: CONTINUE_PROMPT.to_string(),
            output_buffer: OUTPUT_BUFFER_CHUNKS,
        }
    }
}

/// A running relay session.
pub struct RelayHandle {
    stream: RelayStream,
    counter: SegmentCounter,
    task: JoinHandle<Result<RelayReport, RelayError>>,
}

impl RelayHandle {
    pub fn counter(&self) -> &SegmentCounter {
        &self.counter
    }

    pub fn stream_mut(&mut self) -> &mut RelayStream {
        &mut self.stream
    }

    pub fn into_parts(
        self,
    ) -> (
        RelayStream,
        SegmentCounter,
        JoinHandle<Result<RelayReport, RelayError>>,
    ) {
        (self.stream, self.counter, self.task)
    }

    /// Wait for the controller to finish. Output still queued on the stream
    /// is read and discarded so a full buffer cannot stall the session.
    pub async fn outcome(self) -> Result<RelayReport, RelayError> {
        let (mut stream, _counter, task) = self.into_parts();
        while stream.recv().await.is_some() {}
        join_controller(task).await
    }
}

/// Start a relay session.
///
/// The initial segment is requested before this returns, so a backend that
/// rejects the request fails here and nothing has been streamed yet.
pub async fn start_relay(
    backend: Arc<dyn GenerationBackend>,
    history: Vec<Message>,
    model: ModelConfig,
    settings: RelaySettings,
) -> Result<RelayHandle, RelayError> {
    let initial = backend.generate(&history, &model).await?;

    let session = CancellationToken::new();
    let (mut channel, stream) = OutputChannel::open(settings.output_buffer, session);
    channel.switch_source(initial).await?;

    let counter = SegmentCounter::new(settings.max_response_segments);
    debug!(
        provider = %model.provider_id,
        model = %model.model,
        max_switches = counter.max(),
        "relay session started"
    );

    let controller =
        ContinuationController::new(backend, model, settings, history, counter.clone());
    let task = tokio::spawn(controller.run(channel));

    Ok(RelayHandle {
        stream,
        counter,
        task,
    })
}

pub async fn join_controller(
    task: JoinHandle<Result<RelayReport, RelayError>>,
) -> Result<RelayReport, RelayError> {
    match task.await {
        Ok(result) => result,
        Err(err) => Err(RelayError::Backend(BackendError::new(format!(
            "relay controller task failed: {err}"
        )))),
    }
}
