//! Provider client abstraction and registry
//!
//! The dispatch engine never talks to a vendor API directly. It resolves each
//! candidate provider name to a [`ProviderClient`] through a
//! [`ProviderRegistry`] built once at startup.

use crate::protocol::{Completion, CompletionChunk, Embedding, GenerationParams, Message};
use crate::providers::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

/// Lazy, forward-only sequence of completion chunks from a provider
pub type ChunkStream = Pin<Box<dyn Stream<Item = ProviderResult<CompletionChunk>> + Send>>;

/// Core trait that every backend provider client implements
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Execute a non-streaming completion
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> ProviderResult<Completion>;

    /// Execute a streaming completion
    ///
    /// The default implementation performs a plain completion and yields it
    /// as a single chunk carrying the usage.
    async fn stream_complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> ProviderResult<ChunkStream> {
        let completion = self.complete(model, messages, params).await?;
        let chunk = CompletionChunk {
            usage: Some(completion.usage()),
            finish_reason: completion.finish_reason.clone(),
            delta: completion.content,
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(chunk)])))
    }

    /// Embed a single input
    async fn embed(&self, model: &str, input: &str) -> ProviderResult<Embedding> {
        let _ = (model, input);
        Err(ProviderError::Unsupported {
            operation: "embed".to_string(),
        })
    }
}

/// Provider name to client mapping
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under a provider name, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn ProviderClient>) {
        self.clients.insert(name.into(), client);
    }

    /// Builder-style registration
    pub fn with(mut self, name: impl Into<String>, client: Arc<dyn ProviderClient>) -> Self {
        self.register(name, client);
        self
    }

    /// Look up the client for a provider
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(name).cloned()
    }

    /// Whether a client is registered for a provider
    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
