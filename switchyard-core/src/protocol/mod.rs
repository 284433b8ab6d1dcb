//! Protocol module for gateway request/response structures
//!
//! This module defines the canonical data models that flow through dispatch.
//! These structures are designed to be:
//! - Provider-agnostic
//! - Serializable to the JSON payloads transform rules edit
//! - Extensible through pass-through parameter maps

pub mod types;

pub use types::{
    qualified_model, CallContext, ChatResponse, ChatStreamChunk, Completion, CompletionChunk,
    CompletionUsage, ContentPart, DispatchRequest, Embedding, EmbeddingRequest,
    GenerationParams, Message, MessageContent, MessageDelta, MessageRole, ResponseChoice,
    StreamChoice,
};
