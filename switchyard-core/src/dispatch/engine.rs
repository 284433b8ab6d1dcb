//! The dispatch engine
//!
//! One logical call runs as:
//!
//! 1. request rules for the route
//! 2. candidate list: balancer pick (or default provider), then fallback order
//! 3. per candidate: breaker check, provider call under a timeout, bookkeeping
//! 4. response rules and cost on the first success
//!
//! Only exhaustion of every candidate reaches the caller.

use super::error::{AttemptOutcome, AttemptRecord, DispatchError};
use super::pricing::PricingTable;
use super::route::{DispatchSettings, RoutePolicy};
use super::stream::{DispatchStream, StreamProducer};
use crate::balancer::LoadBalancer;
use crate::breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerManager};
use crate::protocol::{ChatResponse, CompletionChunk, DispatchRequest, EmbeddingRequest};
use crate::providers::{ChunkStream, ProviderClient, ProviderError, ProviderRegistry};
use crate::transform::{TransformError, TransformPipeline};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of a successful non-streaming dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub request_id: Uuid,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
    pub latency_ms: f64,
    /// Caller-facing body after response rules
    pub response: Value,
    /// Whether a provider other than the first candidate served the call
    pub used_fallback: bool,
    pub attempts: Vec<AttemptRecord>,
}

/// Outcome of a successful embedding dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingResult {
    pub request_id: Uuid,
    pub provider: String,
    pub model: String,
    pub vector: Vec<f32>,
    pub prompt_tokens: u32,
    pub cost: f64,
    pub latency_ms: f64,
    pub attempts: Vec<AttemptRecord>,
}

/// Breaker and balancer bookkeeping for one in-flight provider call
///
/// Dropping the guard without settling it books the call as cancelled, so a
/// dispatch future abandoned mid-call still counts against the provider.
pub(crate) struct AttemptGuard {
    breaker: Arc<CircuitBreaker>,
    permit: BreakerPermit,
    balancer: Arc<LoadBalancer>,
    pool: String,
    provider: String,
    started: Instant,
    settled: bool,
}

impl AttemptGuard {
    fn start(
        admission: Admission,
        balancer: Arc<LoadBalancer>,
        pool: &str,
        provider: &str,
    ) -> Self {
        balancer.mark_request_start(pool, provider);
        Self {
            breaker: admission.breaker,
            permit: admission.permit,
            balancer,
            pool: pool.to_string(),
            provider: provider.to_string(),
            started: Instant::now(),
            settled: false,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Record success; returns the call latency in milliseconds
    pub(crate) fn succeed(mut self) -> f64 {
        let latency_ms = self.elapsed_ms();
        self.breaker.record_success_with(self.permit, latency_ms);
        self.balancer
            .mark_request_end(&self.pool, &self.provider, latency_ms, true);
        self.settled = true;
        latency_ms
    }

    /// Record failure; returns the call latency in milliseconds
    pub(crate) fn fail(mut self, error: &ProviderError) -> f64 {
        let latency_ms = self.settle_failure(error);
        self.settled = true;
        latency_ms
    }

    fn settle_failure(&self, error: &ProviderError) -> f64 {
        let latency_ms = self.elapsed_ms();
        self.breaker.record_failure_with(self.permit, error);
        self.balancer
            .mark_request_end(&self.pool, &self.provider, latency_ms, false);
        latency_ms
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.settled {
            debug!("Call to {} abandoned before completion", self.provider);
            self.settle_failure(&ProviderError::Cancelled);
        }
    }
}

/// A breaker that admitted a call, with the permit it handed out
pub(crate) struct Admission {
    breaker: Arc<CircuitBreaker>,
    permit: BreakerPermit,
}

/// Candidate providers for one call, with the pool they were drawn from
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    pub route: String,
    pub pool: String,
    pub candidates: Vec<String>,
}

/// Orchestrates breakers, balancer, transform rules and provider clients
pub struct DispatchEngine {
    breakers: Arc<CircuitBreakerManager>,
    balancer: Arc<LoadBalancer>,
    pipeline: Arc<TransformPipeline>,
    pricing: Arc<PricingTable>,
    registry: ProviderRegistry,
    routes: HashMap<String, RoutePolicy>,
    settings: DispatchSettings,
}

/// Builder for [`DispatchEngine`]
pub struct DispatchEngineBuilder {
    registry: ProviderRegistry,
    breakers: Option<Arc<CircuitBreakerManager>>,
    balancer: Option<Arc<LoadBalancer>>,
    pipeline: TransformPipeline,
    pricing: PricingTable,
    routes: HashMap<String, RoutePolicy>,
    settings: DispatchSettings,
}

impl DispatchEngineBuilder {
    /// Share an existing breaker manager
    pub fn breakers(mut self, breakers: Arc<CircuitBreakerManager>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Share an existing balancer
    pub fn balancer(mut self, balancer: Arc<LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    pub fn pipeline(mut self, pipeline: TransformPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    /// Add a route, replacing any route with the same name
    pub fn route(mut self, policy: RoutePolicy) -> Self {
        self.routes.insert(policy.name.clone(), policy);
        self
    }

    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> DispatchEngine {
        DispatchEngine {
            breakers: self.breakers.unwrap_or_default(),
            balancer: self.balancer.unwrap_or_default(),
            pipeline: Arc::new(self.pipeline),
            pricing: Arc::new(self.pricing),
            registry: self.registry,
            routes: self.routes,
            settings: self.settings,
        }
    }
}

enum StreamOpen {
    Ready(ChunkStream, CompletionChunk),
    Failed(ProviderError),
}

impl DispatchEngine {
    pub fn builder(registry: ProviderRegistry) -> DispatchEngineBuilder {
        DispatchEngineBuilder {
            registry,
            breakers: None,
            balancer: None,
            pipeline: TransformPipeline::new(),
            pricing: PricingTable::default(),
            routes: HashMap::new(),
            settings: DispatchSettings::default(),
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn route(&self, name: &str) -> Option<&RoutePolicy> {
        self.routes.get(name)
    }

    /// Ordered, de-duplicated candidate providers for a route
    pub fn plan(&self, route: &str, model: &str) -> DispatchPlan {
        let policy = self.routes.get(route);
        let pool = policy
            .and_then(|p| p.pool.clone())
            .unwrap_or_else(|| model.to_string());

        let mut candidates: Vec<String> = Vec::new();
        match self.balancer.select_provider(&pool, &[]) {
            Some(selected) => candidates.push(selected),
            None => {
                if let Some(default) = policy.and_then(|p| p.default_provider.as_ref()) {
                    candidates.push(default.clone());
                }
            }
        }
        for provider in policy.map(|p| p.fallback_order.as_slice()).unwrap_or_default() {
            if !candidates.contains(provider) {
                candidates.push(provider.clone());
            }
        }

        DispatchPlan {
            route: route.to_string(),
            pool,
            candidates,
        }
    }

    fn model_for(&self, route: &str, provider: &str, requested: &str) -> String {
        match self.routes.get(route) {
            Some(policy) => policy.model_for(provider, requested).to_string(),
            None => requested.to_string(),
        }
    }

    /// Resolve the client and take a breaker slot for `provider`
    ///
    /// Returns `None`, after logging the attempt, when the provider has no
    /// client or its breaker refuses the call.
    fn admit(
        &self,
        request_id: Uuid,
        provider: &str,
        model: &str,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Option<(Admission, Arc<dyn ProviderClient>)> {
        let Some(client) = self.registry.get(provider) else {
            warn!(
                "No client registered for provider {} [request_id: {}]; skipping",
                provider, request_id
            );
            attempts.push(AttemptRecord::new(provider, model, AttemptOutcome::NoClient, None));
            return None;
        };

        let breaker = self.breakers.get_or_create(provider);
        let Some(permit) = breaker.try_acquire() else {
            info!(
                "Circuit open for {} [request_id: {}]; skipping",
                provider, request_id
            );
            attempts.push(AttemptRecord::new(provider, model, AttemptOutcome::Rejected, None));
            return None;
        };
        Some((Admission { breaker, permit }, client))
    }

    fn exhausted(
        &self,
        request_id: Uuid,
        route: String,
        attempts: Vec<AttemptRecord>,
        last_error: Option<ProviderError>,
    ) -> DispatchError {
        error!(
            "All {} candidates failed for route {} [request_id: {}]",
            attempts.len(),
            route,
            request_id
        );
        DispatchError::AllProvidersExhausted {
            route,
            attempts,
            last_error,
        }
    }

    /// Dispatch a chat request, falling back across providers
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError> {
        let request_id = Uuid::new_v4();
        let route = request.route_key().to_string();
        info!(
            "Dispatching route {} (model {}) [request_id: {}]",
            route, request.model, request_id
        );

        let request = self.pipeline.apply_request(&request)?;
        let plan = self.plan(&route, &request.model);
        debug!("Candidates {:?} [request_id: {}]", plan.candidates, request_id);

        let call_timeout = self.settings.call_timeout();
        let mut attempts = Vec::new();
        let mut last_error = None;

        for provider in &plan.candidates {
            let model = self.model_for(&route, provider, &request.model);
            let Some((admission, client)) = self.admit(request_id, provider, &model, &mut attempts)
            else {
                continue;
            };

            let guard = AttemptGuard::start(admission, self.balancer.clone(), &plan.pool, provider);
            let outcome = tokio::time::timeout(
                call_timeout,
                client.complete(&model, &request.messages, &request.params),
            )
            .await
            .unwrap_or_else(|_| Err(ProviderError::timeout(call_timeout)));

            match outcome {
                Ok(completion) => {
                    let latency_ms = guard.succeed();
                    attempts.push(AttemptRecord::new(provider, &model, AttemptOutcome::Succeeded, Some(latency_ms)));

                    let body = ChatResponse::from_completion(
                        format!("chatcmpl-{}", request_id.simple()),
                        chrono::Utc::now().timestamp(),
                        provider,
                        &model,
                        &completion,
                    );
                    let payload = serde_json::to_value(&body)
                        .map_err(|e| TransformError::InvalidPayload(e.to_string()))?;
                    let response =
                        self.pipeline
                            .transform_response(&route, &payload, &request.context.vars())?;

                    let cost = self.pricing.cost(
                        &model,
                        completion.prompt_tokens,
                        completion.completion_tokens,
                    );
                    info!(
                        "Served by {} ({}) in {:.0}ms, cost ${:.6} [request_id: {}]",
                        provider, model, latency_ms, cost, request_id
                    );

                    return Ok(DispatchResult {
                        request_id,
                        provider: provider.clone(),
                        model,
                        prompt_tokens: completion.prompt_tokens,
                        completion_tokens: completion.completion_tokens,
                        cost,
                        latency_ms,
                        response,
                        used_fallback: plan.candidates.first() != Some(provider),
                        attempts,
                    });
                }
                Err(err) => {
                    let latency_ms = guard.fail(&err);
                    warn!(
                        "Provider {} failed [request_id: {}]: {}",
                        provider, request_id, err
                    );
                    attempts.push(AttemptRecord::new(
                        provider,
                        &model,
                        AttemptOutcome::Failed { error: err.clone() },
                        Some(latency_ms),
                    ));
                    last_error = Some(err);
                }
            }
        }

        Err(self.exhausted(request_id, route, attempts, last_error))
    }

    /// Dispatch a chat request as a stream
    ///
    /// Resolves once a provider has produced its first chunk; failures up to
    /// that point fall through to the next candidate. Later failures arrive
    /// as a terminal error event on the returned stream.
    pub async fn dispatch_stream(&self, request: DispatchRequest) -> Result<DispatchStream, DispatchError> {
        let request_id = Uuid::new_v4();
        let route = request.route_key().to_string();
        info!(
            "Dispatching stream for route {} (model {}) [request_id: {}]",
            route, request.model, request_id
        );

        let request = self.pipeline.apply_request(&request)?;
        let plan = self.plan(&route, &request.model);

        let call_timeout = self.settings.call_timeout();
        let mut attempts = Vec::new();
        let mut last_error = None;

        for provider in &plan.candidates {
            let model = self.model_for(&route, provider, &request.model);
            let Some((admission, client)) = self.admit(request_id, provider, &model, &mut attempts)
            else {
                continue;
            };

            let guard = AttemptGuard::start(admission, self.balancer.clone(), &plan.pool, provider);
            let opened = tokio::time::timeout(call_timeout, async {
                let mut chunks = match client
                    .stream_complete(&model, &request.messages, &request.params)
                    .await
                {
                    Ok(chunks) => chunks,
                    Err(err) => return StreamOpen::Failed(err),
                };
                match chunks.next().await {
                    Some(Ok(first)) => StreamOpen::Ready(chunks, first),
                    Some(Err(err)) => StreamOpen::Failed(err),
                    None => StreamOpen::Failed(ProviderError::ParseError {
                        message: "stream ended before the first chunk".to_string(),
                    }),
                }
            })
            .await
            .unwrap_or_else(|_| StreamOpen::Failed(ProviderError::timeout(call_timeout)));

            match opened {
                StreamOpen::Ready(chunks, first) => {
                    debug!("Stream opened by {} [request_id: {}]", provider, request_id);
                    let (sender, receiver) = mpsc::channel(self.settings.stream_buffer.max(1));
                    let producer = StreamProducer {
                        request_id,
                        route: route.clone(),
                        provider: provider.clone(),
                        model: model.clone(),
                        vars: request.context.vars(),
                        pipeline: self.pipeline.clone(),
                        pricing: self.pricing.clone(),
                        guard,
                        chunks,
                        first,
                        idle_timeout: call_timeout,
                        attempts,
                        sender,
                    };
                    tokio::spawn(producer.run());
                    return Ok(DispatchStream::new(request_id, provider.clone(), model, receiver));
                }
                StreamOpen::Failed(err) => {
                    let latency_ms = guard.fail(&err);
                    warn!(
                        "Provider {} failed to start stream [request_id: {}]: {}",
                        provider, request_id, err
                    );
                    attempts.push(AttemptRecord::new(
                        provider,
                        &model,
                        AttemptOutcome::Failed { error: err.clone() },
                        Some(latency_ms),
                    ));
                    last_error = Some(err);
                }
            }
        }

        Err(self.exhausted(request_id, route, attempts, last_error))
    }

    /// Embed text, falling back across providers
    ///
    /// Embedding requests have no transform rules; cost counts prompt
    /// tokens only.
    pub async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResult, DispatchError> {
        let request_id = Uuid::new_v4();
        let route = request.route_key().to_string();
        info!(
            "Dispatching embedding for route {} (model {}) [request_id: {}]",
            route, request.model, request_id
        );

        let plan = self.plan(&route, &request.model);
        let call_timeout = self.settings.call_timeout();
        let mut attempts = Vec::new();
        let mut last_error = None;

        for provider in &plan.candidates {
            let model = self.model_for(&route, provider, &request.model);
            let Some((admission, client)) = self.admit(request_id, provider, &model, &mut attempts)
            else {
                continue;
            };

            let guard = AttemptGuard::start(admission, self.balancer.clone(), &plan.pool, provider);
            let outcome = tokio::time::timeout(call_timeout, client.embed(&model, &request.input))
                .await
                .unwrap_or_else(|_| Err(ProviderError::timeout(call_timeout)));

            match outcome {
                Ok(embedding) => {
                    let latency_ms = guard.succeed();
                    attempts.push(AttemptRecord::new(provider, &model, AttemptOutcome::Succeeded, Some(latency_ms)));
                    let cost = self.pricing.cost(&model, embedding.prompt_tokens, 0);
                    return Ok(EmbeddingResult {
                        request_id,
                        provider: provider.clone(),
                        model,
                        vector: embedding.vector,
                        prompt_tokens: embedding.prompt_tokens,
                        cost,
                        latency_ms,
                        attempts,
                    });
                }
                Err(err) => {
                    let latency_ms = guard.fail(&err);
                    warn!(
                        "Provider {} failed to embed [request_id: {}]: {}",
                        provider, request_id, err
                    );
                    attempts.push(AttemptRecord::new(
                        provider,
                        &model,
                        AttemptOutcome::Failed { error: err.clone() },
                        Some(latency_ms),
                    ));
                    last_error = Some(err);
                }
            }
        }

        Err(self.exhausted(request_id, route, attempts, last_error))
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("providers", &self.registry.names())
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}
