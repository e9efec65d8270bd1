use std::sync::Arc;

use tracing::{debug, info, warn};

use super::channel::{ChannelState, OutputChannel, SegmentFinish};
use super::counter::SegmentCounter;
use super::error::{BackendError, RelayError};
use super::segment::{FinishReason, GenerationBackend};
use super::session::RelaySettings;
use crate::core::message::Message;
use crate::core::providers::ModelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Segment `k` is attached and producing.
    Streaming(usize),
    Deciding,
    Continuing,
    Closed,
    Failed,
}

/// What to do after a segment completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Close(FinishReason),
    Continue,
    BudgetExhausted,
    Fail(RelayError),
}

/// Map a segment's completion onto the next step. Pure so it can be checked
/// without a backend.
pub fn decide(finish: &SegmentFinish, switches: u32, max_switches: u32) -> Decision {
    match finish {
        SegmentFinish::Finished(FinishReason::Length) if switches < max_switches => {
            Decision::Continue
        }
        SegmentFinish::Finished(FinishReason::Length) => Decision::BudgetExhausted,
        SegmentFinish::Finished(FinishReason::ContentFilter) => {
            Decision::Fail(RelayError::ContentFiltered {
                reason: FinishReason::ContentFilter.to_string(),
            })
        }
        SegmentFinish::Finished(FinishReason::Error) => Decision::Fail(RelayError::Backend(
            BackendError::new("provider reported an error finish reason"),
        )),
        SegmentFinish::Finished(reason) => Decision::Close(reason.clone()),
        SegmentFinish::Failed(err) => Decision::Fail(RelayError::Backend(err.clone())),
        SegmentFinish::Cancelled => Decision::Fail(RelayError::Cancelled),
        SegmentFinish::Detached => Decision::Fail(RelayError::invalid_state(
            "continue a detached segment",
            ChannelState::Open,
        )),
    }
}

/// Summary of a relay session that closed normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub switches: u32,
    pub segments: usize,
    pub bytes: usize,
    pub finish_reason: FinishReason,
}

/// Drives one session: watches each segment finish and either closes the
/// channel or requests and switches in a continuation.
pub struct ContinuationController {
    backend: Arc<dyn GenerationBackend>,
    model: ModelConfig,
    settings: RelaySettings,
    history: Vec<Message>,
    counter: SegmentCounter,
    state: ControllerState,
}

impl ContinuationController {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        model: ModelConfig,
        settings: RelaySettings,
        history: Vec<Message>,
        counter: SegmentCounter,
    ) -> Self {
        Self {
            backend,
            model,
            settings,
            history,
            counter,
            state: ControllerState::Streaming(0),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn counter(&self) -> &SegmentCounter {
        &self.counter
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Run until the channel is closed or failed. The channel must already
    /// have its initial segment attached.
    pub async fn run(mut self, mut channel: OutputChannel) -> Result<RelayReport, RelayError> {
        loop {
            self.state = ControllerState::Streaming(channel.segments_attached().saturating_sub(1));

            let outcome = match channel.completion().await {
                Ok(outcome) => outcome,
                Err(err) => return self.fail(&mut channel, err).await,
            };

            self.state = ControllerState::Deciding;
            let switches = self.counter.switches();
            let decision = decide(&outcome.finish, switches, self.counter.max());
            debug!(segment = outcome.index, ?decision, "segment completed");

            match decision {
                Decision::Close(finish_reason) => {
                    if let Err(err) = channel.close().await {
                        self.state = ControllerState::Failed;
                        return Err(err);
                    }
                    self.state = ControllerState::Closed;
                    let report = RelayReport {
                        switches,
                        segments: channel.segments_attached(),
                        bytes: channel.bytes_forwarded(),
                        finish_reason,
                    };
                    info!(
                        switches = report.switches,
                        segments = report.segments,
                        bytes = report.bytes,
                        finish_reason = %report.finish_reason,
                        "relay session closed"
                    );
                    return Ok(report);
                }
                Decision::Continue => {
                    self.state = ControllerState::Continuing;
                    info!(
                        "Reached max token limit ({}): Continuing message ({} switches left)",
                        self.model.max_tokens,
                        self.counter.remaining()
                    );
                    self.push_continuation(outcome.text);

                    let requested = tokio::select! {
                        biased;
                        _ = channel.session().cancelled() => Err(RelayError::Cancelled),
                        source = self.backend.generate(&self.history, &self.model) => {
                            source.map_err(RelayError::from)
                        }
                    };
                    let source = match requested {
                        Ok(source) => source,
                        Err(err) => return self.fail(&mut channel, err).await,
                    };
                    if let Err(err) = channel.switch_source(source).await {
                        return self.fail(&mut channel, err).await;
                    }
                    let switches = self.counter.record_switch();
                    debug!(switches, remaining = self.counter.remaining(), "continuation attached");
                }
                Decision::BudgetExhausted => {
                    warn!(
                        max_tokens = self.model.max_tokens,
                        switches,
                        max_switches = self.counter.max(),
                        remaining = self.counter.remaining(),
                        "Cannot continue message: maximum segments reached"
                    );
                    let err = RelayError::SegmentBudgetExceeded {
                        max_segments: self.counter.max(),
                        switches,
                    };
                    return self.fail(&mut channel, err).await;
                }
                Decision::Fail(err) => return self.fail(&mut channel, err).await,
            }
        }
    }

    fn push_continuation(&mut self, partial: String) {
        self.history.push(Message::assistant(partial));
        let directive = self.settings.continue_prompt.clone();
        self.history.push(Message::user(directive));
    }

    async fn fail(
        &mut self,
        channel: &mut OutputChannel,
        err: RelayError,
    ) -> Result<RelayReport, RelayError> {
        self.state = ControllerState::Failed;
        if let Err(abort_err) = channel.abort(err.clone()).await {
            warn!(error = %abort_err, "channel was already terminal when aborting");
        }
        if err.is_cancelled() {
            debug!("relay session cancelled by consumer");
        } else {
            warn!(error = %err, switches = self.counter.switches(), "relay session failed");
        }
        Err(err)
    }
}
