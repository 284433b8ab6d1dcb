//! Registry of circuit breakers, one per provider

use super::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Owns one [`CircuitBreaker`] per provider name
///
/// Breakers are created lazily with the default config the first time a
/// provider is seen. The map lock only guards lookup; state updates go
/// through each breaker's own lock.
#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: RwLock<CircuitBreakerConfig>,
}

impl CircuitBreakerManager {
    /// Create a manager whose breakers use `default_config`
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config: RwLock::new(default_config),
        }
    }

    /// Breaker for `provider`, creating it on first use
    pub fn get_or_create(&self, provider: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(provider) {
            return breaker;
        }

        let config = self.default_config();
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, config)))
            .clone()
    }

    /// Breaker for `provider`, if one exists
    pub fn get(&self, provider: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()
    }

    /// Give a provider its own config, creating the breaker if needed
    pub fn configure(&self, provider: &str, config: CircuitBreakerConfig) {
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        match breakers.get(provider) {
            Some(breaker) => breaker.update_config(config),
            None => {
                breakers.insert(
                    provider.to_string(),
                    Arc::new(CircuitBreaker::new(provider, config)),
                );
            }
        }
    }

    /// Config used for breakers created from now on
    pub fn default_config(&self) -> CircuitBreakerConfig {
        self.default_config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the default config, optionally applying it to existing breakers
    pub fn set_default_config(&self, config: CircuitBreakerConfig, apply_to_existing: bool) {
        if apply_to_existing {
            for breaker in self.all() {
                breaker.update_config(config.clone());
            }
        }
        *self
            .default_config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Snapshot of every breaker, sorted by provider name
    pub fn all_metrics(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self.all().iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    /// Providers whose circuit is currently open, sorted
    pub fn unhealthy_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .all()
            .iter()
            .filter(|b| b.state() == CircuitState::Open)
            .map(|b| b.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Provider names with a breaker, sorted
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Open a provider's circuit by hand
    pub fn force_open(&self, provider: &str) {
        info!(provider, "Forcing circuit open");
        self.get_or_create(provider).force_open();
    }

    /// Close a provider's circuit by hand
    pub fn force_close(&self, provider: &str) {
        info!(provider, "Forcing circuit closed");
        self.get_or_create(provider).force_close();
    }

    /// Reset one breaker; returns false when the provider is unknown
    pub fn reset(&self, provider: &str) -> bool {
        match self.get(provider) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every breaker
    pub fn reset_all(&self) {
        for breaker in self.all() {
            breaker.reset();
        }
    }

    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
