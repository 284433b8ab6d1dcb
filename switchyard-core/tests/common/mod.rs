//! Shared mock provider for dispatch tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_core::protocol::{
    Completion, CompletionChunk, CompletionUsage, Embedding, GenerationParams, Message,
};
use switchyard_core::providers::{
    ChunkStream, ProviderClient, ProviderError, ProviderRegistry, ProviderResult,
};

/// Route engine logs to the test writer; set `RUST_LOG` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A provider that answers from a script and remembers what it was asked
pub struct MockProvider {
    reply: ProviderResult<Completion>,
    delay: Option<Duration>,
    chunks: Option<Vec<ProviderResult<CompletionChunk>>>,
    stall_after_chunks: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, Vec<Message>, GenerationParams)>>,
}

impl MockProvider {
    fn with_reply(reply: ProviderResult<Completion>) -> Self {
        Self {
            reply,
            delay: None,
            chunks: None,
            stall_after_chunks: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(content: &str) -> Arc<Self> {
        Arc::new(Self::with_reply(Ok(Completion::new(content, 10, 5))))
    }

    pub fn with_usage(content: &str, prompt_tokens: u32, completion_tokens: u32) -> Arc<Self> {
        Arc::new(Self::with_reply(Ok(Completion::new(
            content,
            prompt_tokens,
            completion_tokens,
        ))))
    }

    pub fn failing(error: ProviderError) -> Arc<Self> {
        Arc::new(Self::with_reply(Err(error)))
    }

    /// Answers only after `delay`
    pub fn slow(content: &str, delay: Duration) -> Arc<Self> {
        let mut provider = Self::with_reply(Ok(Completion::new(content, 10, 5)));
        provider.delay = Some(delay);
        Arc::new(provider)
    }

    pub fn streaming(chunks: Vec<ProviderResult<CompletionChunk>>) -> Arc<Self> {
        let mut provider = Self::with_reply(Ok(Completion::default()));
        provider.chunks = Some(chunks);
        Arc::new(provider)
    }

    /// Yields `chunks`, then never produces another item
    pub fn stalling(chunks: Vec<ProviderResult<CompletionChunk>>) -> Arc<Self> {
        let mut provider = Self::with_reply(Ok(Completion::default()));
        provider.chunks = Some(chunks);
        provider.stall_after_chunks = true;
        Arc::new(provider)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_model(&self) -> Option<String> {
        self.seen.lock().unwrap().last().map(|(model, _, _)| model.clone())
    }

    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.seen.lock().unwrap().last().map(|(_, messages, _)| messages.clone())
    }

    pub fn last_params(&self) -> Option<GenerationParams> {
        self.seen.lock().unwrap().last().map(|(_, _, params)| params.clone())
    }

    fn record(&self, model: &str, messages: &[Message], params: &GenerationParams) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec(), params.clone()));
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> ProviderResult<Completion> {
        self.record(model, messages, params);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone()
    }

    async fn stream_complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> ProviderResult<ChunkStream> {
        let Some(chunks) = &self.chunks else {
            let completion = self.complete(model, messages, params).await?;
            let chunk = CompletionChunk {
                usage: Some(completion.usage()),
                finish_reason: completion.finish_reason.clone(),
                delta: completion.content,
            };
            return Ok(Box::pin(stream::iter(vec![Ok(chunk)])));
        };

        self.record(model, messages, params);
        let items = stream::iter(chunks.clone());
        if self.stall_after_chunks {
            Ok(Box::pin(items.chain(stream::pending())))
        } else {
            Ok(Box::pin(items))
        }
    }

    async fn embed(&self, model: &str, input: &str) -> ProviderResult<Embedding> {
        self.record(model, &[Message::user(input)], &GenerationParams::default());
        self.reply.clone().map(|completion| Embedding {
            vector: vec![0.25, 0.5, 0.75],
            prompt_tokens: completion.prompt_tokens,
        })
    }
}

/// Chunk carrying only text
pub fn text(delta: &str) -> ProviderResult<CompletionChunk> {
    Ok(CompletionChunk::delta(delta))
}

/// Final chunk carrying usage
pub fn finish(prompt_tokens: u32, completion_tokens: u32) -> ProviderResult<CompletionChunk> {
    Ok(CompletionChunk {
        delta: String::new(),
        finish_reason: Some("stop".to_string()),
        usage: Some(CompletionUsage::new(prompt_tokens, completion_tokens)),
    })
}

/// Registry over named mocks
pub fn registry(providers: &[(&str, Arc<MockProvider>)]) -> ProviderRegistry {
    providers
        .iter()
        .fold(ProviderRegistry::new(), |registry, (name, provider)| {
            registry.with(*name, provider.clone() as Arc<dyn ProviderClient>)
        })
}

pub fn server_error() -> ProviderError {
    ProviderError::ServerError {
        status_code: 503,
        message: "upstream overloaded".to_string(),
    }
}
