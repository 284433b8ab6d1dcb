//! Provider client abstraction
//!
//! This module defines the contract the dispatch engine consumes from backend
//! LLM providers, the error taxonomy those calls produce, and an
//! OpenAI-compatible HTTP implementation.

pub mod client;
pub mod error;
pub mod http;

pub use client::{ChunkStream, ProviderClient, ProviderRegistry};
pub use error::{ProviderError, ProviderResult};
pub use http::HttpProviderClient;
