//! Core protocol types for gateway dispatch
//!
//! This module contains the data structures that flow through the dispatch
//! engine. The design prioritizes:
//! - A canonical, provider-agnostic request shape that serializes to the JSON
//!   payload the transform pipeline edits
//! - Typed provider results (`Completion`, `CompletionChunk`, `Embedding`)
//! - OpenAI-style response bodies for the caller

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions that guide the model's behavior
    System,
    /// User input message
    User,
    /// Assistant (model) response
    Assistant,
    /// Tool response
    Tool,
}

/// Content of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content
    Text(String),
    /// Structured content parts (multimodal)
    Parts(Vec<ContentPart>),
}

/// Individual content part for multimodal messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content part
    Text { text: String },
    /// Image referenced by URL (or data URL)
    ImageUrl { image_url: Value },
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: MessageContent,

    /// Optional name for the message sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool call ID (for tool response messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_call_id: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    /// Create a tool response message
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::text(MessageRole::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }
}

impl MessageContent {
    /// Check if content is empty
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// Get text content if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(_) => None,
        }
    }

    /// Concatenated text of all text parts
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Generation parameters forwarded to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerationParams {
    /// Sampling temperature (0.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Presence penalty (-2.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Frequency penalty (-2.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// End-user identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Any other provider parameters, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-call context: who is calling and the variables available to
/// `{var}` substitution in transform rules
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallContext {
    /// Tenant the request belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Free-form substitution variables
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
}

impl CallContext {
    /// Context for a tenant
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            variables: HashMap::new(),
        }
    }

    /// Add a substitution variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// All substitution variables, including `tenant_id` when set
    pub fn vars(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();
        if let Some(tenant) = &self.tenant_id {
            vars.entry("tenant_id".to_string())
                .or_insert_with(|| tenant.clone());
        }
        vars
    }
}

/// A logical chat request entering the dispatch engine
///
/// Serializes to the flat JSON payload (`model`, `messages`, parameters)
/// that request transform rules operate on. Routing and context fields are
/// not part of that payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DispatchRequest {
    /// Logical model identifier
    pub model: String,

    /// Messages in the conversation
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Generation parameters
    #[serde(flatten)]
    pub params: GenerationParams,

    /// Route name; defaults to the model id
    #[serde(skip)]
    pub route: Option<String>,

    /// Caller context
    #[serde(skip)]
    pub context: CallContext,
}

impl DispatchRequest {
    /// Create a new request with required fields
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Dispatch through a named route instead of the model id
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Attach call context
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = Some(max_tokens);
        self
    }

    /// Set top_p
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.params.top_p = Some(top_p);
        self
    }

    /// Route key used for transform and fallback lookup
    pub fn route_key(&self) -> &str {
        self.route.as_deref().unwrap_or(&self.model)
    }
}

/// An embedding request entering the dispatch engine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingRequest {
    /// Logical model identifier
    pub model: String,

    /// Text to embed
    pub input: String,

    /// Route name; defaults to the model id
    pub route: Option<String>,
}

impl EmbeddingRequest {
    /// Create a new embedding request
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            route: None,
        }
    }

    /// Route key used for fallback lookup
    pub fn route_key(&self) -> &str {
        self.route.as_deref().unwrap_or(&self.model)
    }
}

// ============================================================================
// Provider results
// ============================================================================

/// A materialized completion returned by a provider client
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub content: String,

    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Finish reason reported by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl Completion {
    /// Create a completion with token counts
    pub fn new(content: impl Into<String>, prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            content: content.into(),
            prompt_tokens,
            completion_tokens,
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Usage block for this completion
    pub fn usage(&self) -> CompletionUsage {
        CompletionUsage::new(self.prompt_tokens, self.completion_tokens)
    }
}

/// One incremental piece of a streamed completion
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Content delta
    pub delta: String,

    /// Finish reason (only in the final chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Usage (only in the final chunk, when the provider reports it)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
}

impl CompletionChunk {
    /// A content delta
    pub fn delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ..Default::default()
        }
    }
}

/// An embedding vector returned by a provider client
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Embedding {
    /// The vector
    pub vector: Vec<f32>,

    /// Tokens consumed by the input
    pub prompt_tokens: u32,
}

/// Token usage information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Total tokens used
    pub total_tokens: u32,
}

impl CompletionUsage {
    /// Usage from prompt and completion counts
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

// ============================================================================
// Caller-facing response bodies
// ============================================================================

/// Complete chat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Unique response ID
    pub id: String,

    /// Object type (`chat.completion`)
    pub object: String,

    /// Creation timestamp
    pub created: i64,

    /// Model used for generation, prefixed with the serving provider
    pub model: String,

    /// Provider that served the request
    pub provider: String,

    /// Response choices
    pub choices: Vec<ResponseChoice>,

    /// Token usage information
    pub usage: CompletionUsage,
}

/// Response choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseChoice {
    /// Choice index
    pub index: usize,

    /// Generated message
    pub message: Message,

    /// Finish reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Streaming response chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStreamChunk {
    /// Unique response ID, shared by every chunk of one stream
    pub id: String,

    /// Object type (`chat.completion.chunk`)
    pub object: String,

    /// Creation timestamp
    pub created: i64,

    /// Model used, prefixed with the serving provider
    pub model: String,

    /// Provider that served the request
    pub provider: String,

    /// Delta choices
    pub choices: Vec<StreamChoice>,

    /// Usage (only in the final chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
}

/// Streaming choice with delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChoice {
    /// Choice index
    pub index: usize,

    /// Delta message content
    pub delta: MessageDelta,

    /// Finish reason (only in the final chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Delta message for streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MessageDelta {
    /// Role (only in the first chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,

    /// Content delta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Model name as reported to callers: `provider/model`
pub fn qualified_model(provider: &str, model: &str) -> String {
    format!("{}/{}", provider, model)
}

impl ChatResponse {
    /// Build the caller-facing body for a provider completion
    pub fn from_completion(
        id: impl Into<String>,
        created: i64,
        provider: &str,
        model: &str,
        completion: &Completion,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion".to_string(),
            created,
            model: qualified_model(provider, model),
            provider: provider.to_string(),
            choices: vec![ResponseChoice {
                index: 0,
                message: Message::assistant(completion.content.clone()),
                finish_reason: completion.finish_reason.clone(),
            }],
            usage: completion.usage(),
        }
    }
}

impl ChatStreamChunk {
    /// Build the caller-facing body for one provider chunk
    pub fn from_chunk(
        id: impl Into<String>,
        created: i64,
        provider: &str,
        model: &str,
        chunk: &CompletionChunk,
        first: bool,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: qualified_model(provider, model),
            provider: provider.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: MessageDelta {
                    role: first.then_some(MessageRole::Assistant),
                    content: (!chunk.delta.is_empty()).then(|| chunk.delta.clone()),
                },
                finish_reason: chunk.finish_reason.clone(),
            }],
            usage: chunk.usage,
        }
    }
}
