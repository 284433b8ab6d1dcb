//! Route policies and engine settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How one route picks and orders its providers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Route name; requests without an explicit route use their model id
    pub name: String,

    /// Load-balanced pool to draw the primary from; defaults to the model id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    /// Primary provider when no pool is registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Model sent to providers without an override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Providers tried after the primary, in order
    #[serde(default)]
    pub fallback_order: Vec<String>,

    /// Provider name to the model id that provider expects
    #[serde(default)]
    pub model_overrides: HashMap<String, String>,
}

impl RoutePolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_fallback<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_order = providers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_model_override(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        self.model_overrides.insert(provider.into(), model.into());
        self
    }

    /// Model to request from `provider`
    pub fn model_for<'a>(&'a self, provider: &str, requested: &'a str) -> &'a str {
        self.model_overrides
            .get(provider)
            .or(self.default_model.as_ref())
            .map(String::as_str)
            .unwrap_or(requested)
    }
}

/// Engine-wide call settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Upper bound on one provider call; for streams, on the wait for each chunk
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Capacity of the channel between a stream's producer task and its consumer
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl DispatchSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

fn default_stream_buffer() -> usize {
    32
}
