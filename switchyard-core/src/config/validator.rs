//! Configuration validation utilities

use super::env::has_placeholder;
use super::error::{ValidationError, ValidationErrorKind};
use super::schema::GatewayConfig;
use std::collections::HashSet;
use tracing::warn;

/// Validator for references between configuration sections
///
/// Provider references are only checked when the document declares
/// providers; otherwise clients are expected to be registered in code.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Reject pools and routes that name undeclared providers
    strict_references: bool,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every referenced provider to be declared, even with no providers section
    pub fn strict(mut self) -> Self {
        self.strict_references = true;
        self
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        config.validate()?;

        self.validate_secrets(config)?;
        self.validate_provider_references(config)?;
        self.validate_pool_references(config)?;

        Ok(())
    }

    fn validate_secrets(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        for (i, provider) in config.providers.iter().enumerate() {
            let Some(api_key) = &provider.api_key else {
                continue;
            };
            if has_placeholder(api_key.expose_secret()) {
                return Err(ValidationError::new(
                    format!("providers[{}].api_key", i),
                    ValidationErrorKind::UnresolvedPlaceholder {
                        placeholder: "api_key".to_string(),
                    },
                )
                .with_context(format!("provider '{}'", provider.name)));
            }
            if api_key.is_empty() {
                warn!("Provider '{}' has an empty API key", provider.name);
            }
        }
        Ok(())
    }

    fn validate_provider_references(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        if config.providers.is_empty() && !self.strict_references {
            return Ok(());
        }

        let known: HashSet<&str> = config.providers.iter().map(|p| p.name.as_str()).collect();
        let check = |path: String, name: &str| {
            if known.contains(name) {
                Ok(())
            } else {
                Err(ValidationError::unknown(path, "provider", name))
            }
        };

        for name in config.circuit_breaker_overrides.keys() {
            check(format!("circuit_breaker_overrides.{}", name), name)?;
        }

        for (i, pool) in config.pools.iter().enumerate() {
            for (j, endpoint) in pool.endpoints.iter().enumerate() {
                check(format!("pools[{}].endpoints[{}].name", i, j), &endpoint.name)?;
            }
        }

        for (i, route) in config.routes.iter().enumerate() {
            let policy = &route.policy;
            if let Some(provider) = &policy.default_provider {
                check(format!("routes[{}].default_provider", i), provider)?;
            }
            for (j, provider) in policy.fallback_order.iter().enumerate() {
                check(format!("routes[{}].fallback_order[{}]", i, j), provider)?;
            }
            for provider in policy.model_overrides.keys() {
                check(format!("routes[{}].model_overrides.{}", i, provider), provider)?;
            }
        }

        Ok(())
    }

    fn validate_pool_references(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        let pools: HashSet<&str> = config.pools.iter().map(|p| p.name.as_str()).collect();

        for (i, route) in config.routes.iter().enumerate() {
            if let Some(pool) = &route.policy.pool {
                if !pools.contains(pool.as_str()) {
                    return Err(ValidationError::unknown(
                        format!("routes[{}].pool", i),
                        "pool",
                        pool.as_str(),
                    ));
                }
            }
        }
        Ok(())
    }
}
