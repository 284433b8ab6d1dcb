//! OpenAI-compatible HTTP provider client using reqwest
//!
//! This client handles:
//! - Connection pooling and client management
//! - Plain and SSE-streamed chat completions, and embeddings
//! - Status code to [`ProviderError`] mapping with retry hints
//! - Request ID generation and correlation

use crate::config::ProviderConnection;
use crate::protocol::{Completion, CompletionChunk, CompletionUsage, Embedding, GenerationParams, Message};
use crate::providers::client::{ChunkStream, ProviderClient};
use crate::providers::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Maximum response size (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Default user agent
const USER_AGENT: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

/// HTTP client for one OpenAI-compatible provider endpoint
#[derive(Clone)]
pub struct HttpProviderClient {
    /// Provider name, for logs
    name: String,

    /// The underlying reqwest client (cheap to clone, pooled)
    client: Client,

    /// Base URL, without trailing slash
    base_url: String,

    /// Bearer token, if the provider needs one
    api_key: Option<String>,

    /// Request timeout applied to every call
    timeout: Duration,
}

impl HttpProviderClient {
    /// Create a client from a provider connection entry
    pub fn from_connection(connection: &ProviderConnection) -> ProviderResult<Self> {
        let timeout = Duration::from_millis(connection.request_timeout_ms);
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(connection.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_millis(connection.connect_timeout_ms))
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::Custom {
                code: "CLIENT_BUILD_ERROR".to_string(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let api_key = connection
            .api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .map(|key| key.expose_secret().to_string());

        Ok(Self {
            name: connection.name.clone(),
            client,
            base_url: connection.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    /// Provider name this client serves
    pub fn name(&self) -> &str {
        &self.name
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn chat_body(
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
        stream: bool,
    ) -> ProviderResult<Value> {
        let mut body = match serde_json::to_value(params)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.insert("model".to_string(), json!(model));
        body.insert("messages".to_string(), serde_json::to_value(messages)?);
        if stream {
            body.insert("stream".to_string(), json!(true));
            body.insert("stream_options".to_string(), json!({ "include_usage": true }));
        }
        Ok(Value::Object(body))
    }

    async fn post(&self, path: &str, body: &Value, request_id: Uuid) -> ProviderResult<Response> {
        let url = self.url(path);
        debug!("Request URL: {} [request_id: {}]", url, request_id);

        let mut req_builder = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }
        req_builder = req_builder.header("X-Request-ID", request_id.to_string());

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!("Request timeout for {} [request_id: {}]", self.name, request_id);
                ProviderError::timeout(self.timeout)
            } else if e.is_connect() {
                error!(
                    "Connection error for {} [request_id: {}]: {}",
                    self.name, request_id, e
                );
                ProviderError::NetworkError {
                    message: format!("Connection failed: {} [request_id: {}]", e, request_id),
                }
            } else {
                error!("Request error for {} [request_id: {}]: {}", self.name, request_id, e);
                ProviderError::NetworkError {
                    message: format!("{} [request_id: {}]", e, request_id),
                }
            }
        })?;

        let status = response.status();
        debug!("Response status: {} [request_id: {}]", status, request_id);

        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.ok();
            warn!(
                "Request failed with status {} for {} [request_id: {}]",
                status, self.name, request_id
            );
            return Err(map_http_error(status, Some(&headers), body, request_id));
        }

        Ok(response)
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: Response,
        request_id: Uuid,
    ) -> ProviderResult<T> {
        if let Some(content_length) = response.content_length() {
            if content_length as usize > MAX_RESPONSE_SIZE {
                return Err(ProviderError::Custom {
                    code: "RESPONSE_TOO_LARGE".to_string(),
                    message: format!(
                        "Response size {} exceeds maximum {}",
                        content_length, MAX_RESPONSE_SIZE
                    ),
                });
            }
        }

        let text = response.text().await.map_err(|e| ProviderError::NetworkError {
            message: format!("Failed to read response body: {} [request_id: {}]", e, request_id),
        })?;

        serde_json::from_str(&text).map_err(|e| {
            error!(
                "Failed to parse response from {} [request_id: {}]: {}",
                self.name, request_id, e
            );
            ProviderError::ParseError {
                message: format!("Invalid response format: {} [request_id: {}]", e, request_id),
            }
        })
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> ProviderResult<Completion> {
        let request_id = Uuid::new_v4();
        info!(
            "Executing chat completion on {} [request_id: {}]",
            self.name, request_id
        );

        let body = Self::chat_body(model, messages, params, false)?;
        let response = self.post("/chat/completions", &body, request_id).await?;
        let wire: WireChatResponse = self.read_json(response, request_id).await?;

        let choice = wire.choices.into_iter().next().ok_or_else(|| ProviderError::ParseError {
            message: format!("Response contained no choices [request_id: {}]", request_id),
        })?;
        let usage = wire.usage.unwrap_or_default();

        Ok(Completion {
            content: choice
                .message
                .and_then(|m| m.content)
                .unwrap_or_default(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream_complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> ProviderResult<ChunkStream> {
        let request_id = Uuid::new_v4();
        info!(
            "Executing streaming chat completion on {} [request_id: {}]",
            self.name, request_id
        );

        let body = Self::chat_body(model, messages, params, true)?;
        let response = self.post("/chat/completions", &body, request_id).await?;

        let events = response.bytes_stream().eventsource();
        let chunks = events
            .take_while(|event| {
                let done = matches!(event, Ok(e) if e.data.trim() == "[DONE]");
                futures::future::ready(!done)
            })
            .filter_map(move |event| async move {
                match event {
                    Ok(event) => match serde_json::from_str::<WireStreamChunk>(&event.data) {
                        Ok(chunk) => Some(Ok(chunk.into_chunk())),
                        Err(e) => {
                            warn!(
                                "Failed to parse stream chunk [request_id: {}]: {}",
                                request_id, e
                            );
                            None
                        }
                    },
                    Err(e) => Some(Err(ProviderError::NetworkError {
                        message: format!("Stream error: {} [request_id: {}]", e, request_id),
                    })),
                }
            });

        Ok(Box::pin(chunks))
    }

    async fn embed(&self, model: &str, input: &str) -> ProviderResult<Embedding> {
        let request_id = Uuid::new_v4();
        let body = json!({ "model": model, "input": input });
        let response = self.post("/embeddings", &body, request_id).await?;
        let wire: WireEmbeddingResponse = self.read_json(response, request_id).await?;

        let vector = wire
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::ParseError {
                message: format!("Response contained no embeddings [request_id: {}]", request_id),
            })?;

        Ok(Embedding {
            vector,
            prompt_tokens: wire.usage.map(|u| u.prompt_tokens).unwrap_or(0),
        })
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    delta: Option<WireMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

impl WireStreamChunk {
    fn into_chunk(self) -> CompletionChunk {
        let choice = self.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let delta = choice
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .unwrap_or_default();
        CompletionChunk {
            delta,
            finish_reason,
            usage: self
                .usage
                .map(|u| CompletionUsage::new(u.prompt_tokens, u.completion_tokens)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingResponse {
    #[serde(default)]
    data: Vec<WireEmbedding>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
}

// ============================================================================
// Error mapping
// ============================================================================

/// Map HTTP status code, headers and response body to a ProviderError
pub fn map_http_error(
    status: StatusCode,
    headers: Option<&HeaderMap>,
    body: Option<String>,
    request_id: Uuid,
) -> ProviderError {
    let error_details = body
        .as_ref()
        .and_then(|b| serde_json::from_str::<Value>(b).ok())
        .and_then(|v| extract_error_details(&v));

    let error_message = error_details
        .as_ref()
        .map(|d| d.message.clone())
        .or_else(|| body.clone())
        .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

    let message_with_id = format!("{} [request_id: {}]", error_message, request_id);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthenticationError,

        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = headers
                .and_then(|h| h.get(reqwest::header::RETRY_AFTER))
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
                .or_else(|| {
                    error_details
                        .and_then(|d| d.retry_after_seconds)
                        .map(Duration::from_secs)
                });
            ProviderError::RateLimit { retry_after }
        }

        StatusCode::NOT_FOUND => ProviderError::ModelNotAvailable {
            model: extract_model_from_error(&error_message)
                .unwrap_or_else(|| "unknown".to_string()),
        },

        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout {
            after: Duration::ZERO,
        },

        status if status.is_server_error() => ProviderError::ServerError {
            status_code: status.as_u16(),
            message: message_with_id,
        },

        status if status.is_client_error() => ProviderError::InvalidRequest {
            message: message_with_id,
        },

        _ => ProviderError::Custom {
            code: format!("HTTP_{}", status.as_u16()),
            message: message_with_id,
        },
    }
}

/// Error details extracted from response body
struct ErrorDetails {
    message: String,
    retry_after_seconds: Option<u64>,
}

/// Extract error details from a JSON error body
fn extract_error_details(json: &Value) -> Option<ErrorDetails> {
    // { "error": { "message": "...", "type": "...", "code": "..." } }
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
            return Some(ErrorDetails {
                message: message.to_string(),
                retry_after_seconds: error.get("retry_after").and_then(|v| v.as_u64()),
            });
        }
        if let Some(message) = error.as_str() {
            return Some(ErrorDetails {
                message: message.to_string(),
                retry_after_seconds: None,
            });
        }
    }

    // { "message": "..." }
    json.get("message")
        .and_then(|v| v.as_str())
        .map(|message| ErrorDetails {
            message: message.to_string(),
            retry_after_seconds: json.get("retry_after").and_then(|v| v.as_u64()),
        })
}

/// Try to extract a model name from messages like "model 'gpt-4' not found"
fn extract_model_from_error(message: &str) -> Option<String> {
    for (open, close) in [("model '", '\''), ("model \"", '"')] {
        if let Some(start) = message.find(open) {
            let start = start + open.len();
            if let Some(end) = message[start..].find(close) {
                return Some(message[start..start + end].to_string());
            }
        }
    }
    None
}

/// Parse a Retry-After header value given in seconds
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    header_value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
