//! The output channel: one consumer-facing stream fed by one segment at a time.
//!
//! The sink sender is moved into the forwarding task of the attached segment
//! and handed back when that task ends. Attaching a second producer therefore
//! requires the first one to have finished and returned the sink; there is
//! never more than one writer. The channel also keeps a reserve sender that
//! only ever carries the terminal error, so a forwarder that dies with the
//! sink cannot turn a failure into a clean end-of-stream.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::error::{BackendError, RelayError};
use super::segment::{FinishReason, SegmentEvent, SegmentSource};

/// What the consumer receives: text chunks, then at most one error.
pub type RelayItem = Result<String, RelayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
    Failed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
            ChannelState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// How a segment's forwarding ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentFinish {
    Finished(FinishReason),
    Failed(BackendError),
    /// The channel detached the segment before it reported a finish reason.
    Detached,
    /// The session was cancelled or the consumer went away.
    Cancelled,
}

/// Completion event of one attached segment.
#[derive(Debug, Clone)]
pub struct SegmentOutcome {
    pub index: usize,
    /// Everything this segment forwarded, used to build continuations.
    pub text: String,
    pub finish: SegmentFinish,
}

struct Forwarded {
    sink: mpsc::Sender<RelayItem>,
    outcome: SegmentOutcome,
    bytes: usize,
}

struct AttachedSegment {
    index: usize,
    stop: CancellationToken,
    detach: CancellationToken,
    task: Option<JoinHandle<Forwarded>>,
}

pub struct OutputChannel {
    state: ChannelState,
    sink: Option<mpsc::Sender<RelayItem>>,
    reserve: Option<mpsc::Sender<RelayItem>>,
    attached: Option<AttachedSegment>,
    session: CancellationToken,
    segments_attached: usize,
    bytes_forwarded: usize,
}

impl OutputChannel {
    /// Open a channel with no attached segment. `capacity` bounds how many
    /// chunks may wait for the consumer before forwarding pauses.
    pub fn open(capacity: usize, session: CancellationToken) -> (Self, RelayStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stream = RelayStream {
            rx,
            session: session.clone(),
            _cancel_on_drop: session.clone().drop_guard(),
        };
        let channel = Self {
            state: ChannelState::Open,
            reserve: Some(tx.clone()),
            sink: Some(tx),
            attached: None,
            session,
            segments_attached: 0,
            bytes_forwarded: 0,
        };
        (channel, stream)
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn segments_attached(&self) -> usize {
        self.segments_attached
    }

    /// Bytes handed to the consumer by segments that have completed.
    pub fn bytes_forwarded(&self) -> usize {
        self.bytes_forwarded
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    pub fn session(&self) -> &CancellationToken {
        &self.session
    }

    /// Attach `source` as the active producer.
    ///
    /// A previous segment that is still forwarding is detached first: the
    /// chunks it already produced reach the consumer, then it is stopped.
    pub async fn switch_source(&mut self, source: SegmentSource) -> Result<(), RelayError> {
        if let Err(err) = self.ensure_open("switch source") {
            source.stop();
            return Err(err);
        }

        if let Some(previous) = self.attached.take() {
            if let Err(err) = self.detach(previous).await {
                source.stop();
                return Err(err);
            }
        }

        if self.session.is_cancelled() {
            source.stop();
            return Err(RelayError::Cancelled);
        }

        let Some(sink) = self.sink.take() else {
            source.stop();
            return Err(RelayError::invalid_state("switch source", self.state));
        };

        let index = self.segments_attached;
        let stop = source.stop_token();
        let detach = CancellationToken::new();
        let task = tokio::spawn(forward_segment(
            index,
            source,
            sink,
            self.session.clone(),
            detach.clone(),
        ));

        self.attached = Some(AttachedSegment {
            index,
            stop,
            detach,
            task: Some(task),
        });
        self.segments_attached += 1;
        debug!(segment = index, "segment attached");
        Ok(())
    }

    /// Wait for the attached segment to finish and report how it ended.
    pub async fn completion(&mut self) -> Result<SegmentOutcome, RelayError> {
        self.ensure_open("await completion")?;
        let task = self
            .attached
            .as_mut()
            .and_then(|segment| segment.task.take())
            .ok_or_else(|| RelayError::invalid_state("await completion", self.state))?;
        self.join(task).await
    }

    /// Finish the stream normally. The consumer sees end-of-stream once the
    /// chunks already queued are read.
    pub async fn close(&mut self) -> Result<(), RelayError> {
        self.ensure_open("close")?;

        if let Some(segment) = self.attached.take() {
            if let Err(err) = self.detach(segment).await {
                self.fail_with(err.clone()).await;
                return Err(err);
            }
        }

        self.sink = None;
        self.reserve = None;
        self.state = ChannelState::Closed;
        debug!(
            segments = self.segments_attached,
            bytes = self.bytes_forwarded,
            "output channel closed"
        );
        Ok(())
    }

    /// Terminate the stream with `error`, stopping the attached segment.
    pub async fn abort(&mut self, error: RelayError) -> Result<(), RelayError> {
        self.ensure_open("abort")?;

        if let Some(mut segment) = self.attached.take() {
            segment.stop.cancel();
            if let Some(task) = segment.task.take() {
                segment.detach.cancel();
                if let Err(join_err) = self.join(task).await {
                    warn!(error = %join_err, "failed to reclaim sink while aborting");
                }
            }
        }

        self.fail_with(error).await;
        Ok(())
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), RelayError> {
        match self.state {
            ChannelState::Open => Ok(()),
            state => Err(RelayError::invalid_state(operation, state)),
        }
    }

    async fn detach(
        &mut self,
        mut segment: AttachedSegment,
    ) -> Result<Option<SegmentOutcome>, RelayError> {
        let Some(task) = segment.task.take() else {
            return Ok(None);
        };
        debug!(segment = segment.index, "detaching segment that is still forwarding");
        segment.detach.cancel();
        self.join(task).await.map(Some)
    }

    async fn join(&mut self, task: JoinHandle<Forwarded>) -> Result<SegmentOutcome, RelayError> {
        match task.await {
            Ok(forwarded) => {
                self.sink = Some(forwarded.sink);
                self.bytes_forwarded += forwarded.bytes;
                Ok(forwarded.outcome)
            }
            Err(err) => {
                warn!(error = %err, "segment forwarding task ended abnormally");
                // The sink died with the task; errors still need a way out.
                self.sink = self.reserve.clone();
                Err(RelayError::Backend(BackendError::new(format!(
                    "segment forwarding task failed: {err}"
                ))))
            }
        }
    }

    async fn fail_with(&mut self, error: RelayError) {
        self.state = ChannelState::Failed;
        let reserve = self.reserve.take();
        let Some(sink) = self.sink.take().or(reserve) else {
            return;
        };
        if self.session.is_cancelled() {
            return;
        }
        tokio::select! {
            biased;
            _ = self.session.cancelled() => {}
            _ = sink.send(Err(error)) => {}
        }
    }
}

impl Drop for OutputChannel {
    fn drop(&mut self) {
        if let Some(segment) = &self.attached {
            segment.stop.cancel();
            segment.detach.cancel();
        }
    }
}

enum Wake {
    Cancelled,
    Detach,
    Event(Option<SegmentEvent>),
}

async fn forward_segment(
    index: usize,
    mut source: SegmentSource,
    sink: mpsc::Sender<RelayItem>,
    session: CancellationToken,
    detach: CancellationToken,
) -> Forwarded {
    let mut text = String::new();

    let finish = loop {
        let wake = tokio::select! {
            biased;
            _ = session.cancelled() => Wake::Cancelled,
            _ = sink.closed() => Wake::Cancelled,
            _ = detach.cancelled() => Wake::Detach,
            event = source.next_event() => Wake::Event(event),
        };

        match wake {
            Wake::Cancelled => break SegmentFinish::Cancelled,
            Wake::Detach => {
                source.stop();
                break drain_buffered(&mut source, &sink, &session, &mut text).await;
            }
            Wake::Event(Some(SegmentEvent::Chunk(chunk))) => {
                if chunk.is_empty() {
                    continue;
                }
                text.push_str(&chunk);
                if !send_chunk(&sink, &session, chunk).await {
                    break SegmentFinish::Cancelled;
                }
            }
            Wake::Event(Some(SegmentEvent::Finished(reason))) => {
                break SegmentFinish::Finished(reason)
            }
            Wake::Event(Some(SegmentEvent::Failed(err))) => break SegmentFinish::Failed(err),
            Wake::Event(None) => {
                break SegmentFinish::Failed(BackendError::new(
                    "segment ended without a finish reason",
                ))
            }
        }
    };

    source.stop();
    debug!(segment = index, finish = ?finish, bytes = text.len(), "segment forwarding ended");

    let bytes = text.len();
    Forwarded {
        sink,
        outcome: SegmentOutcome {
            index,
            text,
            finish,
        },
        bytes,
    }
}

/// Flush chunks the producer already queued, without waiting for more.
async fn drain_buffered(
    source: &mut SegmentSource,
    sink: &mpsc::Sender<RelayItem>,
    session: &CancellationToken,
    text: &mut String,
) -> SegmentFinish {
    while let Some(event) = source.try_next_event() {
        match event {
            SegmentEvent::Chunk(chunk) if !chunk.is_empty() => {
                text.push_str(&chunk);
                if !send_chunk(sink, session, chunk).await {
                    return SegmentFinish::Cancelled;
                }
            }
            SegmentEvent::Chunk(_) => {}
            SegmentEvent::Finished(reason) => return SegmentFinish::Finished(reason),
            SegmentEvent::Failed(err) => return SegmentFinish::Failed(err),
        }
    }
    SegmentFinish::Detached
}

async fn send_chunk(
    sink: &mpsc::Sender<RelayItem>,
    session: &CancellationToken,
    chunk: String,
) -> bool {
    tokio::select! {
        biased;
        _ = session.cancelled() => false,
        sent = sink.send(Ok(chunk)) => sent.is_ok(),
    }
}

/// Consumer handle of an output channel.
///
/// Dropping it cancels the session, which stops the active segment and
/// prevents any further continuation request.
pub struct RelayStream {
    rx: mpsc::Receiver<RelayItem>,
    session: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl RelayStream {
    pub async fn recv(&mut self) -> Option<RelayItem> {
        self.rx.recv().await
    }

    /// Stop the relay. Nothing is delivered after this call, including
    /// chunks that were already queued.
    pub fn cancel(&mut self) {
        self.session.cancel();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    /// Read the stream to the end and concatenate the chunks.
    pub async fn collect_text(mut self) -> Result<String, RelayError> {
        let mut output = String::new();
        while let Some(item) = self.recv().await {
            output.push_str(&item?);
        }
        Ok(output)
    }
}

impl Stream for RelayStream {
    type Item = RelayItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayStream")
            .field("cancelled", &self.session.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scripted(chunks: &[&str], reason: FinishReason) -> SegmentSource {
        let (writer, source) = SegmentSource::channel(chunks.len() + 1);
        for chunk in chunks {
            assert!(writer.chunk(*chunk).await);
        }
        writer.finish(reason).await;
        source
    }

    #[tokio::test]
    async fn forwards_one_segment_then_closes() {
        let (mut channel, stream) = OutputChannel::open(8, CancellationToken::new());
        assert_eq!(channel.state(), ChannelState::Open);

        channel
            .switch_source(scripted(&["Hel", "lo"], FinishReason::Stop).await)
            .await
            .expect("switch on open channel");
        let outcome = channel.completion().await.expect("completion");
        assert_eq!(outcome.index, 0);
        assert_eq!(outcome.text, "Hello");
        assert_eq!(outcome.finish, SegmentFinish::Finished(FinishReason::Stop));

        channel.close().await.expect("first close");
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.bytes_forwarded(), 5);
        assert_eq!(stream.collect_text().await.expect("clean end"), "Hello");
    }

    #[tokio::test]
    async fn switch_after_close_is_rejected_and_state_kept() {
        let (mut channel, _stream) = OutputChannel::open(8, CancellationToken::new());
        channel.close().await.expect("close");

        let err = channel
            .switch_source(scripted(&["late"], FinishReason::Stop).await)
            .await
            .expect_err("closed channel must reject sources");
        assert_eq!(
            err,
            RelayError::invalid_state("switch source", ChannelState::Closed)
        );
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.segments_attached(), 0);
    }

    #[tokio::test]
    async fn second_close_is_invalid() {
        let (mut channel, _stream) = OutputChannel::open(8, CancellationToken::new());
        channel.close().await.expect("close");
        let err = channel.close().await.expect_err("second close");
        assert!(matches!(err, RelayError::InvalidState { operation: "close", .. }));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn dead_forwarder_still_delivers_the_terminal_error() {
        let (mut channel, mut stream) = OutputChannel::open(8, CancellationToken::new());
        let (writer, source) = SegmentSource::channel(4);
        assert!(writer.chunk("par").await);
        channel.switch_source(source).await.expect("switch");

        assert_eq!(stream.recv().await, Some(Ok("par".to_string())));
        channel
            .attached
            .as_ref()
            .and_then(|segment| segment.task.as_ref())
            .expect("forwarder running")
            .abort();

        let err = channel.completion().await.expect_err("forwarder was killed");
        assert!(matches!(err, RelayError::Backend(_)));
        channel.abort(err).await.expect("abort open channel");
        assert_eq!(channel.state(), ChannelState::Failed);

        assert!(matches!(stream.recv().await, Some(Err(RelayError::Backend(_)))));
        drop(writer);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn abort_delivers_error_as_last_item() {
        let (mut channel, mut stream) = OutputChannel::open(8, CancellationToken::new());
        channel
            .switch_source(scripted(&["partial"], FinishReason::Length).await)
            .await
            .expect("switch");
        channel.completion().await.expect("completion");
        channel
            .abort(RelayError::SegmentBudgetExceeded {
                max_segments: 0,
                switches: 0,
            })
            .await
            .expect("abort open channel");
        assert_eq!(channel.state(), ChannelState::Failed);

        assert_eq!(stream.recv().await, Some(Ok("partial".to_string())));
        assert!(matches!(
            stream.recv().await,
            Some(Err(RelayError::SegmentBudgetExceeded { .. }))
        ));
        assert_eq!(stream.recv().await, None);

        let err = channel
            .abort(RelayError::Cancelled)
            .await
            .expect_err("abort is a one-time transition");
        assert!(matches!(err, RelayError::InvalidState { .. }));
        assert_eq!(channel.state(), ChannelState::Failed);
    }

    #[tokio::test]
    async fn switching_flushes_the_running_segment_first() {
        let (mut channel, stream) = OutputChannel::open(8, CancellationToken::new());

        // First segment never finishes on its own.
        let (first_writer, first) = SegmentSource::channel(8);
        assert!(first_writer.chunk("one ").await);
        assert!(first_writer.chunk("two ").await);
        channel.switch_source(first).await.expect("first switch");

        channel
            .switch_source(scripted(&["three"], FinishReason::Stop).await)
            .await
            .expect("second switch");
        assert!(first_writer.is_stopped());

        let outcome = channel.completion().await.expect("second completion");
        assert_eq!(outcome.index, 1);
        channel.close().await.expect("close");

        assert_eq!(
            stream.collect_text().await.expect("clean end"),
            "one two three"
        );
    }

    #[tokio::test]
    async fn missing_finish_reason_is_a_backend_failure() {
        let (mut channel, _stream) = OutputChannel::open(8, CancellationToken::new());
        let (writer, source) = SegmentSource::channel(4);
        assert!(writer.chunk("cut").await);
        drop(writer);

        channel.switch_source(source).await.expect("switch");
        let outcome = channel.completion().await.expect("completion");
        assert!(matches!(outcome.finish, SegmentFinish::Failed(_)));
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_forwarding() {
        let session = CancellationToken::new();
        let (mut channel, stream) = OutputChannel::open(1, session.clone());
        let (writer, source) = SegmentSource::channel(1);
        channel.switch_source(source).await.expect("switch");

        drop(stream);
        assert!(session.is_cancelled());

        let outcome = channel.completion().await.expect("completion");
        assert_eq!(outcome.finish, SegmentFinish::Cancelled);
        assert!(writer.is_stopped());
    }
}
