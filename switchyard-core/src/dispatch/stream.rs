//! Streaming dispatch
//!
//! Once a provider has produced its first chunk, a spawned task owns the
//! provider stream and feeds caller-facing events into a bounded channel.
//! The consumer sees a forward-only sequence that always ends with
//! [`StreamEvent::Done`].

use super::engine::AttemptGuard;
use super::error::{AttemptOutcome, AttemptRecord};
use super::pricing::PricingTable;
use crate::protocol::{ChatStreamChunk, CompletionChunk, CompletionUsage};
use crate::providers::{ChunkStream, ProviderError};
use crate::transform::TransformPipeline;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Terminal SSE frame
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Error reported inside a stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamError {
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl StreamError {
    pub fn from_provider(provider: &str, error: &ProviderError) -> Self {
        Self {
            message: error.to_string(),
            code: error.code().to_string(),
            provider: Some(provider.to_string()),
        }
    }
}

/// Accounting for a finished stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub request_id: Uuid,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
    pub latency_ms: f64,
    /// False when the stream ended on an error
    pub completed: bool,
    pub attempts: Vec<AttemptRecord>,
}

/// One item of a dispatch stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Caller-facing chunk body, after response rules
    Chunk(Value),
    /// Mid-stream failure; always followed by `Done`
    Error(StreamError),
    Done(StreamSummary),
}

impl StreamEvent {
    /// Encode as one server-sent-events frame
    pub fn to_sse_frame(&self) -> String {
        match self {
            Self::Chunk(body) => format!("data: {}\n\n", body),
            Self::Error(error) => format!("data: {}\n\n", json!({ "error": error })),
            Self::Done(_) => SSE_DONE.to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Consumer side of a streaming dispatch
#[derive(Debug)]
pub struct DispatchStream {
    request_id: Uuid,
    provider: String,
    model: String,
    events: ReceiverStream<StreamEvent>,
}

impl DispatchStream {
    pub(crate) fn new(
        request_id: Uuid,
        provider: String,
        model: String,
        receiver: mpsc::Receiver<StreamEvent>,
    ) -> Self {
        Self {
            request_id,
            provider,
            model,
            events: ReceiverStream::new(receiver),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Provider serving this stream
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Encode every event as an SSE frame
    pub fn into_sse(self) -> impl Stream<Item = Bytes> + Send {
        self.map(|event| Bytes::from(event.to_sse_frame()))
    }
}

impl Stream for DispatchStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Everything the producer task needs once the first chunk has arrived
pub(crate) struct StreamProducer {
    pub request_id: Uuid,
    pub route: String,
    pub provider: String,
    pub model: String,
    pub vars: HashMap<String, String>,
    pub pipeline: Arc<TransformPipeline>,
    pub pricing: Arc<PricingTable>,
    pub guard: AttemptGuard,
    pub chunks: ChunkStream,
    pub first: CompletionChunk,
    pub idle_timeout: Duration,
    pub attempts: Vec<AttemptRecord>,
    pub sender: mpsc::Sender<StreamEvent>,
}

enum Ending {
    Finished,
    Failed(ProviderError),
    Rejected(String),
    ConsumerGone,
}

impl StreamProducer {
    pub(crate) async fn run(self) {
        let StreamProducer {
            request_id,
            route,
            provider,
            model,
            vars,
            pipeline,
            pricing,
            guard,
            mut chunks,
            first,
            idle_timeout,
            mut attempts,
            sender,
        } = self;

        let response_id = format!("chatcmpl-{}", request_id.simple());
        let created = chrono::Utc::now().timestamp();
        let mut usage: Option<CompletionUsage> = None;
        let mut pending = Some(first);
        let mut index = 0usize;

        let ending = loop {
            let chunk = match pending.take() {
                Some(chunk) => chunk,
                None => match tokio::time::timeout(idle_timeout, chunks.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(error))) => break Ending::Failed(error),
                    Ok(None) => break Ending::Finished,
                    Err(_) => break Ending::Failed(ProviderError::timeout(idle_timeout)),
                },
            };

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }

            let body = ChatStreamChunk::from_chunk(&response_id, created, &provider, &model, &chunk, index == 0);
            let payload = match serde_json::to_value(&body)
                .map_err(|e| e.to_string())
                .and_then(|v| pipeline.transform_response(&route, &v, &vars).map_err(|e| e.to_string()))
            {
                Ok(payload) => payload,
                Err(message) => break Ending::Rejected(message),
            };

            if sender.send(StreamEvent::Chunk(payload)).await.is_err() {
                break Ending::ConsumerGone;
            }
            index += 1;
        };

        let usage = usage.unwrap_or_default();
        let (latency_ms, completed, error) = match ending {
            Ending::Finished => {
                let latency_ms = guard.succeed();
                attempts.push(AttemptRecord::new(&provider, &model, AttemptOutcome::Succeeded, Some(latency_ms)));
                info!(
                    "Stream completed by {} [request_id: {}]: {} chunks in {:.0}ms",
                    provider, request_id, index, latency_ms
                );
                (latency_ms, true, None)
            }
            Ending::Failed(error) => {
                let latency_ms = guard.fail(&error);
                warn!(
                    "Stream from {} failed after {} chunks [request_id: {}]: {}",
                    provider, index, request_id, error
                );
                attempts.push(AttemptRecord::new(
                    &provider,
                    &model,
                    AttemptOutcome::Failed { error: error.clone() },
                    Some(latency_ms),
                ));
                (latency_ms, false, Some(StreamError::from_provider(&provider, &error)))
            }
            Ending::Rejected(message) => {
                // The provider did its job; only the response rules failed
                let latency_ms = guard.succeed();
                attempts.push(AttemptRecord::new(&provider, &model, AttemptOutcome::Succeeded, Some(latency_ms)));
                warn!("Response transform failed mid-stream [request_id: {}]: {}", request_id, message);
                let error = StreamError {
                    message,
                    code: "transform_error".to_string(),
                    provider: Some(provider.clone()),
                };
                (latency_ms, false, Some(error))
            }
            Ending::ConsumerGone => {
                debug!("Stream consumer went away [request_id: {}]", request_id);
                // Dropping the guard books the call as cancelled
                drop(guard);
                return;
            }
        };

        if let Some(error) = error {
            if sender.send(StreamEvent::Error(error)).await.is_err() {
                return;
            }
        }

        let summary = StreamSummary {
            request_id,
            cost: pricing.cost(&model, usage.prompt_tokens, usage.completion_tokens),
            provider,
            model,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            latency_ms,
            completed,
            attempts,
        };
        let _ = sender.send(StreamEvent::Done(summary)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_frames() {
        let chunk = StreamEvent::Chunk(json!({"id": "c1"}));
        assert_eq!(chunk.to_sse_frame(), "data: {\"id\":\"c1\"}\n\n");

        let error = StreamEvent::Error(StreamError::from_provider(
            "openai",
            &ProviderError::ServerError {
                status_code: 502,
                message: "bad gateway".to_string(),
            },
        ));
        let frame = error.to_sse_frame();
        let body: Value = serde_json::from_str(
            frame.strip_prefix("data: ").unwrap().trim_end(),
        )
        .unwrap();
        assert_eq!(body["error"]["code"], "server_error");
        assert_eq!(body["error"]["provider"], "openai");

        let done = StreamEvent::Done(StreamSummary {
            request_id: Uuid::nil(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: 0.0,
            latency_ms: 0.0,
            completed: true,
            attempts: Vec::new(),
        });
        assert!(done.is_done());
        assert_eq!(done.to_sse_frame(), SSE_DONE);
    }
}
