//! Streaming dispatch tests

mod common;

use bytes::Bytes;
use common::{finish, registry, server_error, text, MockProvider};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use switchyard_core::dispatch::{
    DispatchEngine, DispatchError, DispatchSettings, DispatchStream, RoutePolicy, StreamEvent,
    SSE_DONE,
};
use switchyard_core::protocol::{DispatchRequest, Message};
use switchyard_core::transform::{RouteRules, TransformPipeline};

fn chat() -> DispatchRequest {
    common::init_tracing();
    DispatchRequest::new("gpt-4", vec![Message::user("Stream please")])
}

fn route() -> RoutePolicy {
    RoutePolicy::new("gpt-4").with_default_provider("a").with_fallback(["b"])
}

async fn collect(stream: DispatchStream) -> Vec<StreamEvent> {
    stream.collect().await
}

#[tokio::test]
async fn test_stream_delivers_chunks_then_done() {
    let a = MockProvider::streaming(vec![text("Hel"), text("lo"), finish(10, 5)]);
    let engine = DispatchEngine::builder(registry(&[("a", a)]))
        .route(route())
        .build();

    let stream = engine.dispatch_stream(chat()).await.unwrap();
    assert_eq!(stream.provider(), "a");
    let events = collect(stream).await;

    assert_eq!(events.len(), 4);
    let StreamEvent::Chunk(first) = &events[0] else {
        panic!("expected chunk, got {:?}", events[0]);
    };
    assert_eq!(first["object"], "chat.completion.chunk");
    assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(first["choices"][0]["delta"]["content"], "Hel");

    let StreamEvent::Done(summary) = &events[3] else {
        panic!("expected done, got {:?}", events[3]);
    };
    assert!(summary.completed);
    assert_eq!(summary.prompt_tokens, 10);
    assert_eq!(summary.completion_tokens, 5);
    // 10/1000 * 0.03 + 5/1000 * 0.06
    assert!((summary.cost - 0.0006).abs() < 1e-12);

    let breaker = engine.breakers().get("a").unwrap().snapshot();
    assert_eq!(breaker.success_count, 1);
}

#[tokio::test]
async fn test_failure_before_first_chunk_falls_through() {
    let a = MockProvider::streaming(vec![Err(server_error())]);
    let b = MockProvider::streaming(vec![text("from b"), finish(3, 2)]);
    let engine = DispatchEngine::builder(registry(&[("a", a), ("b", b)]))
        .route(route())
        .build();

    let stream = engine.dispatch_stream(chat()).await.unwrap();
    assert_eq!(stream.provider(), "b");
    let events = collect(stream).await;

    let StreamEvent::Done(summary) = events.last().unwrap() else {
        panic!("stream must end with done");
    };
    assert_eq!(summary.attempts.len(), 2);
    assert!(!summary.attempts[0].succeeded());
    assert!(summary.attempts[1].succeeded());
    assert_eq!(engine.breakers().get("a").unwrap().snapshot().failure_count, 1);
}

#[tokio::test]
async fn test_empty_provider_stream_falls_through() {
    let a = MockProvider::streaming(Vec::new());
    let b = MockProvider::streaming(vec![text("from b")]);
    let engine = DispatchEngine::builder(registry(&[("a", a), ("b", b)]))
        .route(route())
        .build();

    let stream = engine.dispatch_stream(chat()).await.unwrap();
    assert_eq!(stream.provider(), "b");
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error_then_done() {
    let a = MockProvider::streaming(vec![text("partial"), Err(server_error())]);
    let b = MockProvider::streaming(vec![text("never used")]);
    let engine = DispatchEngine::builder(registry(&[("a", a), ("b", b.clone())]))
        .route(route())
        .build();

    let events = collect(engine.dispatch_stream(chat()).await.unwrap()).await;

    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], StreamEvent::Chunk(_)));
    match &events[1] {
        StreamEvent::Error(error) => {
            assert_eq!(error.code, "server_error");
            assert_eq!(error.provider.as_deref(), Some("a"));
        }
        other => panic!("expected error event, got {:?}", other),
    }
    match &events[2] {
        StreamEvent::Done(summary) => assert!(!summary.completed),
        other => panic!("expected done, got {:?}", other),
    }

    assert_eq!(b.calls(), 0);
    assert_eq!(engine.breakers().get("a").unwrap().snapshot().failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_stream_times_out() {
    let a = MockProvider::stalling(vec![text("hello")]);
    let engine = DispatchEngine::builder(registry(&[("a", a)]))
        .route(RoutePolicy::new("gpt-4").with_default_provider("a"))
        .settings(DispatchSettings {
            call_timeout_ms: 1_000,
            ..Default::default()
        })
        .build();

    let events = collect(engine.dispatch_stream(chat()).await.unwrap()).await;

    assert_eq!(events.len(), 3);
    match &events[1] {
        StreamEvent::Error(error) => assert_eq!(error.code, "timeout"),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(engine.breakers().get("a").unwrap().snapshot().failure_count, 1);
}

#[tokio::test]
async fn test_exhausted_stream_is_an_error() {
    let engine = DispatchEngine::builder(registry(&[
        ("a", MockProvider::streaming(vec![Err(server_error())])),
        ("b", MockProvider::streaming(vec![Err(server_error())])),
    ]))
    .route(route())
    .build();

    match engine.dispatch_stream(chat()).await {
        Err(DispatchError::AllProvidersExhausted { attempts, .. }) => assert_eq!(attempts.len(), 2),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected exhaustion"),
    }
}

#[tokio::test]
async fn test_sse_encoding() {
    let a = MockProvider::streaming(vec![text("Hi"), Err(server_error())]);
    let engine = DispatchEngine::builder(registry(&[("a", a)]))
        .route(RoutePolicy::new("gpt-4").with_default_provider("a"))
        .build();

    let frames: Vec<Bytes> = engine
        .dispatch_stream(chat())
        .await
        .unwrap()
        .into_sse()
        .collect()
        .await;

    assert_eq!(frames.len(), 3);
    let first = std::str::from_utf8(&frames[0]).unwrap();
    assert!(first.starts_with("data: {"));
    assert!(first.ends_with("\n\n"));
    let error = std::str::from_utf8(&frames[1]).unwrap();
    assert!(error.starts_with("data: {\"error\":"));
    assert_eq!(&frames[2][..], SSE_DONE.as_bytes());
}

#[tokio::test]
async fn test_response_rules_apply_to_every_chunk() {
    let a = MockProvider::streaming(vec![text("one"), text("two")]);
    let rules: RouteRules = serde_json::from_value(json!({
        "response": [{"op": "normalize_format", "drop_provider_field": true}]
    }))
    .unwrap();
    let mut pipeline = TransformPipeline::new();
    pipeline.register_route("gpt-4", rules).unwrap();
    let engine = DispatchEngine::builder(registry(&[("a", a)]))
        .pipeline(pipeline)
        .route(RoutePolicy::new("gpt-4").with_default_provider("a"))
        .build();

    let events = collect(engine.dispatch_stream(chat()).await.unwrap()).await;

    let chunks: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Chunk(body) => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(chunks.len(), 2);
    for chunk in chunks {
        assert_eq!(chunk["model"], "gpt-4");
        assert!(chunk.get("provider").is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_dropped_consumer_counts_as_cancelled() {
    let chunks = (0..8).map(|i| text(&format!("part {}", i))).collect();
    let a = MockProvider::streaming(chunks);
    let engine = DispatchEngine::builder(registry(&[("a", a)]))
        .route(RoutePolicy::new("gpt-4").with_default_provider("a"))
        .settings(DispatchSettings {
            stream_buffer: 1,
            ..Default::default()
        })
        .build();

    let mut stream = engine.dispatch_stream(chat()).await.unwrap();
    assert!(matches!(stream.next().await, Some(StreamEvent::Chunk(_))));
    drop(stream);

    let breaker = engine.breakers().get("a").unwrap();
    for _ in 0..100 {
        if breaker.snapshot().failure_count > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.failure_count, 1);
    assert_eq!(snapshot.success_count, 0);
}
