use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use super::*;
use crate::core::constants::CONTINUE_PROMPT;
use crate::core::message::Message;
use crate::utils::test_utils::{test_model_config, ScriptedBackend, ScriptedSegment};

fn settings(max_response_segments: u32) -> RelaySettings {
    RelaySettings {
        max_response_segments,
        ..Default::default()
    }
}

fn conversation() -> Vec<Message> {
    vec![
        Message::system("You are terse."),
        Message::user("Tell me a story."),
    ]
}

async fn start(
    backend: &Arc<ScriptedBackend>,
    settings: RelaySettings,
) -> RelayHandle {
    match start_relay(backend.clone(), conversation(), test_model_config(), settings).await {
        Ok(handle) => handle,
        Err(err) => panic!("relay should start: {err}"),
    }
}

/// Read the whole stream, returning the concatenated text and the error
/// that ended it, if any.
async fn drain(stream: &mut RelayStream) -> (String, Option<RelayError>) {
    let mut text = String::new();
    while let Some(item) = stream.recv().await {
        match item {
            Ok(chunk) => text.push_str(&chunk),
            Err(err) => {
                assert!(stream.recv().await.is_none(), "error must be the last item");
                return (text, Some(err));
            }
        }
    }
    (text, None)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold before the timeout");
}

#[tokio::test]
async fn single_segment_streams_and_closes() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedSegment::complete(
        &["Hel", "lo"],
        FinishReason::Stop,
    )]));
    let handle = start(&backend, settings(2)).await;
    let (stream, counter, task) = handle.into_parts();

    let items: Vec<RelayItem> = stream.collect().await;
    assert_eq!(items, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);

    let report = join_controller(task).await.expect("relay should close");
    assert_eq!(report.switches, 0);
    assert_eq!(report.segments, 1);
    assert_eq!(report.bytes, 5);
    assert_eq!(report.finish_reason, FinishReason::Stop);
    assert_eq!(counter.switches(), 0);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn truncated_segments_are_continued_seamlessly() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::truncated(&["The quick ", "brown "]),
        ScriptedSegment::truncated(&["fox jumps "]),
        ScriptedSegment::complete(&["over the dog."], FinishReason::Stop),
    ]));
    let mut handle = start(&backend, settings(2)).await;

    let (text, error) = drain(handle.stream_mut()).await;
    assert_eq!(text, "The quick brown fox jumps over the dog.");
    assert!(error.is_none());
    assert_eq!(handle.counter().switches(), 2);
    assert!(handle.counter().is_exhausted());

    let report = handle.outcome().await.expect("relay should close");
    assert_eq!(report.switches, 2);
    assert_eq!(report.segments, 3);
    assert_eq!(report.bytes, text.len());
    assert_eq!(backend.call_count(), 3);
}

#[tokio::test]
async fn continuation_requests_carry_partial_and_directive() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::truncated(&["first ", "part"]),
        ScriptedSegment::truncated(&[" second"]),
        ScriptedSegment::complete(&[" end"], FinishReason::Stop),
    ]));
    let handle = start(&backend, settings(3)).await;
    let (stream, _counter, task) = handle.into_parts();
    assert_eq!(
        stream.collect_text().await.expect("no error"),
        "first part second end"
    );
    join_controller(task).await.expect("relay should close");

    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], conversation());

    let mut expected = conversation();
    expected.push(Message::assistant("first part"));
    expected.push(Message::user(CONTINUE_PROMPT));
    assert_eq!(calls[1], expected);

    expected.push(Message::assistant(" second"));
    expected.push(Message::user(CONTINUE_PROMPT));
    assert_eq!(calls[2], expected);
}

#[tokio::test]
async fn custom_continue_prompt_is_used() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::truncated(&["a"]),
        ScriptedSegment::complete(&["b"], FinishReason::Stop),
    ]));
    let handle = start(
        &backend,
        RelaySettings {
            continue_prompt: "go on".to_string(),
            ..settings(1)
        },
    )
    .await;
    handle.outcome().await.expect("relay should close");

    let calls = backend.calls();
    assert_eq!(calls[1].last(), Some(&Message::user("go on")));
}

#[tokio::test]
async fn outcome_does_not_wait_on_an_unread_full_buffer() {
    let backend = Arc::new(ScriptedBackend::with_buffer(
        vec![
            ScriptedSegment::truncated(&["a", "b", "c", "d"]),
            ScriptedSegment::complete(&["e", "f", "g"], FinishReason::Stop),
        ],
        1,
    ));
    let handle = start(
        &backend,
        RelaySettings {
            output_buffer: 1,
            ..settings(1)
        },
    )
    .await;

    let report = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .expect("outcome should not stall on backpressure")
        .expect("relay should close");
    assert_eq!(report.switches, 1);
    assert_eq!(report.bytes, 7);
}

#[tokio::test]
async fn exhausted_budget_fails_after_delivered_text() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::truncated(&["one "]),
        ScriptedSegment::truncated(&["two "]),
        ScriptedSegment::truncated(&["three"]),
        ScriptedSegment::complete(&["never"], FinishReason::Stop),
    ]));
    let mut handle = start(&backend, settings(2)).await;

    let (text, error) = drain(handle.stream_mut()).await;
    assert_eq!(text, "one two three");
    assert_eq!(
        error,
        Some(RelayError::SegmentBudgetExceeded {
            max_segments: 2,
            switches: 2,
        })
    );
    assert_eq!(backend.call_count(), 3);

    let outcome = handle.outcome().await;
    assert!(matches!(
        outcome,
        Err(RelayError::SegmentBudgetExceeded { .. })
    ));
}

#[tokio::test]
async fn zero_budget_never_continues() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::truncated(&["only"]),
        ScriptedSegment::complete(&["never"], FinishReason::Stop),
    ]));
    let mut handle = start(&backend, settings(0)).await;

    let (text, error) = drain(handle.stream_mut()).await;
    assert_eq!(text, "only");
    assert!(matches!(
        error,
        Some(RelayError::SegmentBudgetExceeded { switches: 0, .. })
    ));
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn dropping_the_stream_mid_segment_stops_the_producer() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::hang(&["partial"]),
        ScriptedSegment::complete(&["never"], FinishReason::Stop),
    ]));
    let handle = start(&backend, settings(2)).await;
    let (mut stream, counter, task) = handle.into_parts();

    assert_eq!(stream.recv().await, Some(Ok("partial".to_string())));
    drop(stream);

    let outcome = join_controller(task).await;
    assert_eq!(outcome, Err(RelayError::Cancelled));
    wait_until(|| backend.stops_observed() == 1).await;
    assert_eq!(backend.call_count(), 1);
    assert_eq!(counter.switches(), 0);
}

#[tokio::test]
async fn cancel_discards_queued_chunks() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedSegment::hang(&[
        "a", "b", "c",
    ])]));
    let mut handle = start(&backend, settings(2)).await;

    let stream = handle.stream_mut();
    assert_eq!(stream.recv().await, Some(Ok("a".to_string())));
    stream.cancel();
    assert!(stream.is_cancelled());
    assert_eq!(stream.recv().await, None);

    assert_eq!(handle.outcome().await, Err(RelayError::Cancelled));
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn continuation_rejection_fails_the_stream() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::truncated(&["part one "]),
        ScriptedSegment::Reject(BackendError::with_status(529, "overloaded")),
    ]));
    let mut handle = start(&backend, settings(2)).await;

    let (text, error) = drain(handle.stream_mut()).await;
    assert_eq!(text, "part one ");
    match error {
        Some(RelayError::Backend(err)) => {
            assert_eq!(err.status(), Some(529));
            assert_eq!(err.message(), "overloaded");
        }
        other => panic!("expected a backend error, got {other:?}"),
    }
    // The failed request already counted as a call but not as a switch.
    assert_eq!(backend.call_count(), 2);
    assert_eq!(handle.counter().switches(), 0);
}

#[tokio::test]
async fn initial_rejection_fails_before_streaming() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedSegment::Reject(
        BackendError::with_status(401, "invalid api key"),
    )]));
    let result = start_relay(
        backend.clone(),
        conversation(),
        test_model_config(),
        settings(2),
    )
    .await;

    match result {
        Ok(_) => panic!("initial backend failure should surface from start_relay"),
        Err(RelayError::Backend(err)) => assert_eq!(err.status(), Some(401)),
        Err(other) => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn mid_segment_failure_is_not_retried() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::Fail {
            chunks: vec!["abc".to_string()],
            error: BackendError::new("connection reset"),
        },
        ScriptedSegment::complete(&["never"], FinishReason::Stop),
    ]));
    let mut handle = start(&backend, settings(2)).await;

    let (text, error) = drain(handle.stream_mut()).await;
    assert_eq!(text, "abc");
    assert_eq!(
        error,
        Some(RelayError::Backend(BackendError::new("connection reset")))
    );
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn content_filter_fails_the_stream() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedSegment::complete(
        &["I can't"],
        FinishReason::ContentFilter,
    )]));
    let mut handle = start(&backend, settings(2)).await;

    let (text, error) = drain(handle.stream_mut()).await;
    assert_eq!(text, "I can't");
    assert!(matches!(error, Some(RelayError::ContentFiltered { .. })));
}

#[tokio::test]
async fn other_finish_reasons_close_without_continuing() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedSegment::complete(&["calling a tool"], FinishReason::ToolCalls),
        ScriptedSegment::complete(&["never"], FinishReason::Stop),
    ]));
    let handle = start(&backend, settings(2)).await;
    let (stream, _counter, task) = handle.into_parts();

    assert_eq!(stream.collect_text().await.expect("no error"), "calling a tool");
    let report = join_controller(task).await.expect("relay should close");
    assert_eq!(report.finish_reason, FinishReason::ToolCalls);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn slow_consumer_bounds_producer_progress() {
    let chunks: Vec<String> = (0..20).map(|i| format!("{i},")).collect();
    let chunk_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
    let backend = Arc::new(ScriptedBackend::with_buffer(
        vec![ScriptedSegment::complete(&chunk_refs, FinishReason::Stop)],
        1,
    ));
    let mut handle = start(
        &backend,
        RelaySettings {
            output_buffer: 1,
            ..settings(2)
        },
    )
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    // One chunk queued for the consumer, one held by the forwarder and one
    // in the segment buffer.
    assert!(
        backend.chunks_sent() <= 3,
        "producer ran ahead: {} chunks",
        backend.chunks_sent()
    );

    let (text, error) = drain(handle.stream_mut()).await;
    assert!(error.is_none());
    assert_eq!(text, chunks.concat());
    assert_eq!(backend.chunks_sent(), 20);
}
