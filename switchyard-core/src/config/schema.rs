//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use super::secrets::{SafeLogging, SecretString};
use crate::balancer::{ProviderEndpoint, Strategy};
use crate::breaker::CircuitBreakerConfig;
use crate::dispatch::{DispatchSettings, ModelPricing, PricingTable, RoutePolicy, DEFAULT_RATE};
use crate::transform::RouteRules;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Schema version this build understands
pub const SUPPORTED_VERSION: &str = "0.1";

/// Root configuration structure for a gateway deployment
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// Breaker settings for providers without an override
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-provider breaker settings
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub circuit_breaker_overrides: HashMap<String, CircuitBreakerConfig>,

    /// Upstream providers reached over HTTP
    #[serde(default)]
    pub providers: Vec<ProviderConnection>,

    /// Load-balanced provider pools
    #[serde(default)]
    pub pools: Vec<PoolConfig>,

    /// Route policies with their transform rules
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub dispatch: DispatchSettings,
}

/// Connection settings for one HTTP provider
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConnection {
    /// Unique provider name
    pub name: String,

    /// Base URL of the provider's OpenAI-compatible API
    pub base_url: String,

    /// API key (supports environment variable interpolation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

impl ProviderConnection {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_idle_per_host: default_max_idle_per_host(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.name", path)));
        }

        let url = url::Url::parse(&self.base_url).map_err(|e| {
            ValidationError::new(
                format!("{}.base_url", path),
                ValidationErrorKind::InvalidUrl {
                    message: e.to_string(),
                },
            )
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ValidationError::new(
                format!("{}.base_url", path),
                ValidationErrorKind::InvalidUrl {
                    message: format!("unsupported scheme '{}'", url.scheme()),
                },
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.request_timeout_ms", path),
                "must be greater than 0",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.connect_timeout_ms", path),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl SafeLogging for ProviderConnection {
    fn safe_for_logging(&self) -> String {
        format!(
            "{} ({}, api_key: {})",
            self.name,
            self.base_url,
            self.api_key
                .as_ref()
                .map(SecretString::partial_redact)
                .unwrap_or_else(|| "none".to_string())
        )
    }
}

/// A named pool of weighted endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Group name; routes reach the pool through it
    pub name: String,

    #[serde(default)]
    pub strategy: Strategy,

    pub endpoints: Vec<EndpointConfig>,
}

impl PoolConfig {
    /// Endpoints in the balancer's representation
    pub fn to_endpoints(&self) -> Vec<ProviderEndpoint> {
        self.endpoints
            .iter()
            .map(|e| ProviderEndpoint::new(e.name.clone(), e.weight).with_health(e.healthy))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Provider name
    pub name: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Initial health; the breaker updates it at runtime
    #[serde(default = "default_true")]
    pub healthy: bool,
}

/// Route policy plus the transform rules bound to it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    #[serde(flatten)]
    pub policy: RoutePolicy,

    #[serde(default, skip_serializing_if = "RouteRules::is_empty")]
    pub transforms: RouteRules,
}

/// Model pricing overrides
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Family key to rate; merged over the built-in table
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,

    /// Rate for models matching no family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_rate: Option<ModelPricing>,

    /// Start from the built-in families
    #[serde(default = "default_true")]
    pub include_builtin: bool,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            models: HashMap::new(),
            default_rate: None,
            include_builtin: true,
        }
    }
}

impl PricingConfig {
    pub fn to_table(&self) -> PricingTable {
        let mut table = if self.include_builtin {
            PricingTable::default()
        } else {
            PricingTable::empty(DEFAULT_RATE)
        };
        if let Some(rate) = self.default_rate {
            table.set_default_rate(rate);
        }
        for (family, pricing) in &self.models {
            table.insert(family.clone(), *pricing);
        }
        table
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let entries = self
            .models
            .iter()
            .map(|(family, rate)| (format!("pricing.models.{}", family), rate))
            .chain(
                self.default_rate
                    .iter()
                    .map(|rate| ("pricing.default_rate".to_string(), rate)),
            );

        for (path, rate) in entries {
            for value in [rate.input_per_1k, rate.output_per_1k] {
                if !value.is_finite() || value < 0.0 {
                    return Err(ValidationError::out_of_range(
                        path,
                        format!("rate must be a non-negative number, got {}", value),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_idle_per_host() -> usize {
    10
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn validate_breaker(path: &str, config: &CircuitBreakerConfig) -> Result<(), ValidationError> {
    let checks = [
        ("failure_threshold", u64::from(config.failure_threshold)),
        ("success_threshold", u64::from(config.success_threshold)),
        ("half_open_max_requests", u64::from(config.half_open_max_requests)),
        ("timeout_secs", config.timeout_secs),
        ("window_secs", config.window_secs),
    ];
    for (field, value) in checks {
        if value == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.{}", path, field),
                "must be at least 1",
            ));
        }
    }
    Ok(())
}

fn check_unique<'a>(
    path: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for (i, name) in names.enumerate() {
        if name.trim().is_empty() {
            return Err(ValidationError::required(format!("{}[{}].name", path, i)));
        }
        if !seen.insert(name) {
            return Err(ValidationError::duplicate(format!("{}[{}].name", path, i), name));
        }
    }
    Ok(())
}

impl GatewayConfig {
    /// Structural validation of a single document
    ///
    /// Cross-references between sections are checked by
    /// [`ConfigValidator`](super::ConfigValidator).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version != SUPPORTED_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::InvalidVersion {
                    expected: SUPPORTED_VERSION.to_string(),
                    actual: self.version.clone(),
                },
            ));
        }

        validate_breaker("circuit_breaker", &self.circuit_breaker)?;
        for (name, config) in &self.circuit_breaker_overrides {
            validate_breaker(&format!("circuit_breaker_overrides.{}", name), config)?;
        }

        check_unique("providers", self.providers.iter().map(|p| p.name.as_str()))?;
        for (i, provider) in self.providers.iter().enumerate() {
            provider.validate(&format!("providers[{}]", i))?;
        }

        check_unique("pools", self.pools.iter().map(|p| p.name.as_str()))?;
        for (i, pool) in self.pools.iter().enumerate() {
            let path = format!("pools[{}]", i);
            if pool.endpoints.is_empty() {
                return Err(ValidationError::required(format!("{}.endpoints", path)));
            }
            check_unique(
                &format!("{}.endpoints", path),
                pool.endpoints.iter().map(|e| e.name.as_str()),
            )?;
            for (j, endpoint) in pool.endpoints.iter().enumerate() {
                if endpoint.weight == 0 {
                    return Err(ValidationError::out_of_range(
                        format!("{}.endpoints[{}].weight", path, j),
                        "weight must be at least 1",
                    ));
                }
            }
        }

        check_unique("routes", self.routes.iter().map(|r| r.policy.name.as_str()))?;

        self.pricing.validate()?;

        if self.dispatch.call_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                "dispatch.call_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.dispatch.stream_buffer == 0 {
            return Err(ValidationError::out_of_range(
                "dispatch.stream_buffer",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}
