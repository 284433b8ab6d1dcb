//! Tests for dispatch, fallback and cost accounting
//!
//! Providers are scripted mocks; the engine under test is wired the same
//! way a config-built one is.

mod common;

use common::{registry, server_error, MockProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::balancer::{ProviderEndpoint, Strategy};
use switchyard_core::breaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
use switchyard_core::dispatch::{
    AttemptOutcome, DispatchEngine, DispatchError, DispatchSettings, ModelPricing, PricingTable,
    RoutePolicy,
};
use switchyard_core::protocol::{CallContext, DispatchRequest, EmbeddingRequest, Message, MessageRole};
use switchyard_core::providers::ProviderError;
use switchyard_core::transform::{RouteRules, TransformPipeline};
use test_case::test_case;

fn chat(model: &str) -> DispatchRequest {
    common::init_tracing();
    DispatchRequest::new(model, vec![Message::user("Hello")])
}

#[tokio::test]
async fn test_primary_success_no_fallback() {
    let a = MockProvider::ok("from a");
    let b = MockProvider::ok("from b");
    let engine = DispatchEngine::builder(registry(&[("a", a.clone()), ("b", b.clone())]))
        .route(RoutePolicy::new("gpt-4").with_default_provider("a").with_fallback(["b"]))
        .build();

    let result = engine.dispatch(chat("gpt-4")).await.unwrap();

    assert_eq!(result.provider, "a");
    assert!(!result.used_fallback);
    assert_eq!(result.attempts.len(), 1);
    assert!(result.attempts[0].succeeded());
    assert_eq!(result.response["choices"][0]["message"]["content"], "from a");
    assert_eq!(result.response["model"], "a/gpt-4");
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn test_open_primary_skipped_without_failure() {
    let a = MockProvider::ok("from a");
    let b = MockProvider::ok("from b");
    let engine = DispatchEngine::builder(registry(&[("a", a.clone()), ("b", b.clone())]))
        .route(RoutePolicy::new("gpt-4").with_default_provider("a").with_fallback(["b"]))
        .build();
    engine.breakers().force_open("a");

    let result = engine.dispatch(chat("gpt-4")).await.unwrap();

    assert_eq!(result.provider, "b");
    assert!(result.used_fallback);
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Rejected);
    assert!(matches!(
        result.attempts[0].error(),
        Some(DispatchError::ProviderUnavailable { ref provider }) if provider == "a"
    ));
    assert_eq!(a.calls(), 0);

    let primary = engine.breakers().get("a").unwrap().snapshot();
    assert_eq!(primary.failure_count, 0);
    assert_eq!(primary.success_count, 0);
    assert_eq!(primary.state, CircuitState::Open);

    let fallback = engine.breakers().get("b").unwrap().snapshot();
    assert_eq!(fallback.success_count, 1);
    assert_eq!(fallback.failure_count, 0);
}

#[tokio::test]
async fn test_failures_fall_through_and_count() {
    let a = MockProvider::failing(server_error());
    let b = MockProvider::failing(ProviderError::RateLimit { retry_after: None });
    let c = MockProvider::ok("from c");
    let engine = DispatchEngine::builder(registry(&[("a", a), ("b", b), ("c", c)]))
        .route(RoutePolicy::new("gpt-4").with_default_provider("a").with_fallback(["b", "c"]))
        .build();

    let result = engine.dispatch(chat("gpt-4")).await.unwrap();

    assert_eq!(result.provider, "c");
    let outcomes: Vec<_> = result.attempts.iter().map(|a| a.provider.as_str()).collect();
    assert_eq!(outcomes, vec!["a", "b", "c"]);
    assert!(matches!(result.attempts[0].outcome, AttemptOutcome::Failed { .. }));
    assert_eq!(engine.breakers().get("a").unwrap().snapshot().failure_count, 1);
    assert_eq!(engine.breakers().get("b").unwrap().snapshot().failure_count, 1);
}

#[tokio::test]
async fn test_exhaustion_carries_last_error() {
    let engine = DispatchEngine::builder(registry(&[
        ("a", MockProvider::failing(server_error())),
        ("b", MockProvider::failing(ProviderError::AuthenticationError)),
    ]))
    .route(RoutePolicy::new("gpt-4").with_default_provider("a").with_fallback(["b"]))
    .build();

    let err = engine.dispatch(chat("gpt-4")).await.unwrap_err();

    assert_eq!(err.code(), "all_providers_exhausted");
    assert_eq!(err.attempts().len(), 2);
    match &err {
        DispatchError::AllProvidersExhausted { route, last_error, .. } => {
            assert_eq!(route, "gpt-4");
            assert_eq!(last_error, &Some(ProviderError::AuthenticationError));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn test_candidate_without_client_is_skipped() {
    let b = MockProvider::ok("from b");
    let engine = DispatchEngine::builder(registry(&[("b", b)]))
        .route(RoutePolicy::new("gpt-4").with_default_provider("ghost").with_fallback(["b"]))
        .build();

    let result = engine.dispatch(chat("gpt-4")).await.unwrap();

    assert_eq!(result.provider, "b");
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::NoClient);
    assert!(engine.breakers().get("ghost").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let slow = MockProvider::slow("too late", Duration::from_secs(30));
    let fast = MockProvider::ok("in time");
    let engine = DispatchEngine::builder(registry(&[("slow", slow), ("fast", fast)]))
        .route(
            RoutePolicy::new("gpt-4")
                .with_default_provider("slow")
                .with_fallback(["fast"]),
        )
        .settings(DispatchSettings {
            call_timeout_ms: 1_000,
            ..Default::default()
        })
        .build();

    let result = engine.dispatch(chat("gpt-4")).await.unwrap();

    assert_eq!(result.provider, "fast");
    match &result.attempts[0].outcome {
        AttemptOutcome::Failed { error } => assert_eq!(error.code(), "timeout"),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(engine.breakers().get("slow").unwrap().snapshot().failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_dispatch_counts_against_provider() {
    let slow = MockProvider::slow("never seen", Duration::from_secs(30));
    let engine = DispatchEngine::builder(registry(&[("slow", slow)]))
        .route(RoutePolicy::new("gpt-4").with_default_provider("slow"))
        .build();

    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), engine.dispatch(chat("gpt-4"))).await;
    assert!(abandoned.is_err());

    let snapshot = engine.breakers().get("slow").unwrap().snapshot();
    assert_eq!(snapshot.failure_count, 1);
    assert_eq!(snapshot.last_error.as_deref(), Some("Request cancelled before the provider responded"));
}

#[tokio::test]
async fn test_repeated_failures_open_breaker_then_skip() {
    let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig {
        failure_threshold: 2,
        ..Default::default()
    }));
    let a = MockProvider::failing(server_error());
    let b = MockProvider::ok("from b");
    let engine = DispatchEngine::builder(registry(&[("a", a.clone()), ("b", b)]))
        .breakers(breakers.clone())
        .route(RoutePolicy::new("gpt-4").with_default_provider("a").with_fallback(["b"]))
        .build();

    for _ in 0..3 {
        engine.dispatch(chat("gpt-4")).await.unwrap();
    }

    assert_eq!(a.calls(), 2);
    assert_eq!(breakers.unhealthy_providers(), vec!["a"]);
}

#[tokio::test]
async fn test_pool_selection_and_bookkeeping() {
    let a = MockProvider::ok("from a");
    let b = MockProvider::ok("from b");
    let engine = DispatchEngine::builder(registry(&[("a", a.clone()), ("b", b.clone())]))
        .route(RoutePolicy::new("gpt-4"))
        .build();
    engine
        .balancer()
        .register_pool(
            "gpt-4",
            vec![ProviderEndpoint::new("a", 1), ProviderEndpoint::new("b", 3)],
            Strategy::WeightedRoundRobin,
        )
        .unwrap();

    for _ in 0..4 {
        engine.dispatch(chat("gpt-4")).await.unwrap();
    }

    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 3);
    let stats = engine.balancer().pool_stats("gpt-4").unwrap();
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.active_requests, 0);
    assert!(stats.endpoints.iter().all(|e| e.avg_latency_ms.is_some()));
}

#[tokio::test]
async fn test_model_overrides_per_provider() {
    let a = MockProvider::failing(server_error());
    let b = MockProvider::ok("from b");
    let engine = DispatchEngine::builder(registry(&[("a", a.clone()), ("b", b.clone())]))
        .route(
            RoutePolicy::new("chat")
                .with_default_provider("a")
                .with_default_model("gpt-4o")
                .with_fallback(["b"])
                .with_model_override("b", "claude-3-5-sonnet"),
        )
        .build();

    let result = engine.dispatch(chat("gpt-4").with_route("chat")).await.unwrap();

    assert_eq!(a.last_model().as_deref(), Some("gpt-4o"));
    assert_eq!(b.last_model().as_deref(), Some("claude-3-5-sonnet"));
    assert_eq!(result.model, "claude-3-5-sonnet");
}

#[tokio::test]
async fn test_transform_rules_shape_request_and_response() {
    let a = MockProvider::ok("hello");
    let rules: RouteRules = serde_json::from_value(json!({
        "request": [
            {"op": "inject_system_prompt", "prompt": "You are helping {tenant_id}."},
            {"op": "cap_value", "field": "temperature", "max": 1.0},
            {"op": "set", "field": "user", "value": "{tenant_id}", "condition": "temperature > 0.5"}
        ],
        "response": [
            {"op": "normalize_format", "drop_provider_field": true},
            {"op": "add_metadata", "fields": {"metadata.tenant": "{tenant_id}"}},
            {"op": "filter_fields", "fields": ["usage"]}
        ]
    }))
    .unwrap();
    let mut pipeline = TransformPipeline::new();
    pipeline.register_route("gpt-4", rules).unwrap();

    let engine = DispatchEngine::builder(registry(&[("a", a.clone())]))
        .pipeline(pipeline)
        .route(RoutePolicy::new("gpt-4").with_default_provider("a"))
        .build();

    let request = chat("gpt-4")
        .with_temperature(1.7)
        .with_context(CallContext::for_tenant("acme"));
    let result = engine.dispatch(request).await.unwrap();

    let messages = a.last_messages().unwrap();
    assert_eq!(messages[0].role, MessageRole::System);
    assert_eq!(messages[0].content.as_text(), Some("You are helping acme."));
    let params = a.last_params().unwrap();
    assert_eq!(params.temperature, Some(1.0));
    assert_eq!(params.user.as_deref(), Some("acme"));

    assert_eq!(result.response["model"], "gpt-4");
    assert_eq!(result.response["metadata"]["tenant"], "acme");
    assert!(result.response.get("provider").is_none());
    assert!(result.response.get("usage").is_none());
    // Accounting is unaffected by response rules
    assert_eq!(result.prompt_tokens, 10);
}

#[tokio::test]
async fn test_transform_error_surfaces_before_any_call() {
    let a = MockProvider::ok("hello");
    let rules: RouteRules = serde_json::from_value(json!({
        "request": [{"op": "set", "field": "messages", "value": "not a list"}]
    }))
    .unwrap();
    let mut pipeline = TransformPipeline::new();
    pipeline.register_route("gpt-4", rules).unwrap();
    let engine = DispatchEngine::builder(registry(&[("a", a.clone())]))
        .pipeline(pipeline)
        .route(RoutePolicy::new("gpt-4").with_default_provider("a"))
        .build();

    let err = engine.dispatch(chat("gpt-4")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Transform(_)));
    assert_eq!(a.calls(), 0);
}

#[test_case("gpt-4", 1000, 500, 0.06 ; "gpt-4 list price")]
#[test_case("gpt-4-0613", 1000, 0, 0.03 ; "dated snapshot matches family")]
#[test_case("mystery-model", 1000, 1000, 0.003 ; "unknown model uses default rate")]
#[test_case("gpt-4", 0, 0, 0.0 ; "no tokens costs nothing")]
fn test_cost_calculation(model: &str, prompt: u32, completion: u32, expected: f64) {
    let cost = PricingTable::default().cost(model, prompt, completion);
    assert!((cost - expected).abs() < 1e-9, "cost {} != {}", cost, expected);
}

#[tokio::test]
async fn test_dispatch_reports_cost_of_served_model() {
    let a = MockProvider::with_usage("priced", 1000, 500);
    let engine = DispatchEngine::builder(registry(&[("a", a)]))
        .pricing(PricingTable::default().with("house-model", ModelPricing::new(1.0, 2.0)))
        .route(
            RoutePolicy::new("chat")
                .with_default_provider("a")
                .with_model_override("a", "gpt-4"),
        )
        .build();

    let result = engine
        .dispatch(chat("house-model").with_route("chat"))
        .await
        .unwrap();

    assert_eq!(result.model, "gpt-4");
    assert!((result.cost - 0.06).abs() < 1e-9);
}

#[tokio::test]
async fn test_embedding_falls_back_and_prices_prompt_only() {
    let a = MockProvider::failing(server_error());
    let b = MockProvider::with_usage("", 2000, 0);
    let engine = DispatchEngine::builder(registry(&[("a", a), ("b", b)]))
        .pricing(PricingTable::empty(ModelPricing::new(0.0001, 5.0)))
        .route(
            RoutePolicy::new("text-embedding-3-small")
                .with_default_provider("a")
                .with_fallback(["b"]),
        )
        .build();

    let result = engine
        .embed(EmbeddingRequest::new("text-embedding-3-small", "some text"))
        .await
        .unwrap();

    assert_eq!(result.provider, "b");
    assert_eq!(result.vector.len(), 3);
    assert!((result.cost - 0.0002).abs() < 1e-12);
    assert_eq!(result.attempts.len(), 2);
}
