//! Load balancing across provider pools
//!
//! A pool is a named group of interchangeable providers serving one logical
//! model. Each pool sits behind its own lock so selections in one pool never
//! wait on another.

pub mod error;
pub mod pool;
pub mod strategy;

pub use error::BalancerError;
pub use pool::{PoolStats, ProviderEndpoint, ProviderPool, LATENCY_SMOOTHING};
pub use strategy::Strategy;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

/// Registry of provider pools
#[derive(Debug, Default)]
pub struct LoadBalancer {
    pools: RwLock<HashMap<String, Arc<Mutex<ProviderPool>>>>,
}

fn lock(pool: &Mutex<ProviderPool>) -> MutexGuard<'_, ProviderPool> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, group: &str) -> Option<Arc<Mutex<ProviderPool>>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .cloned()
    }

    /// Create or replace a pool
    ///
    /// Every endpoint needs a positive weight and a unique name.
    pub fn register_pool(
        &self,
        group: &str,
        endpoints: Vec<ProviderEndpoint>,
        strategy: Strategy,
    ) -> Result<(), BalancerError> {
        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            if endpoint.weight == 0 {
                return Err(BalancerError::ZeroWeight {
                    pool: group.to_string(),
                    endpoint: endpoint.name.clone(),
                });
            }
            if !seen.insert(endpoint.name.as_str()) {
                return Err(BalancerError::DuplicateEndpoint {
                    pool: group.to_string(),
                    endpoint: endpoint.name.clone(),
                });
            }
        }

        info!(
            pool = group,
            strategy = %strategy,
            endpoints = endpoints.len(),
            "Registering provider pool"
        );

        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        match pools.get(group) {
            Some(existing) => lock(existing).replace(endpoints, strategy),
            None => {
                pools.insert(
                    group.to_string(),
                    Arc::new(Mutex::new(ProviderPool::new(group, endpoints, strategy))),
                );
            }
        }
        Ok(())
    }

    /// Drop a pool; returns false when it did not exist
    pub fn remove_pool(&self, group: &str) -> bool {
        self.pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(group)
            .is_some()
    }

    pub fn has_pool(&self, group: &str) -> bool {
        self.pool(group).is_some()
    }

    /// Registered pool names, sorted
    pub fn groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Pick a provider from `group`, skipping `exclude`
    ///
    /// Unknown groups and empty eligible sets both yield `None`.
    pub fn select_provider(&self, group: &str, exclude: &[String]) -> Option<String> {
        let pool = self.pool(group)?;
        let selected = lock(&pool).select(exclude);
        debug!(pool = group, selected = ?selected, "Provider selection");
        selected
    }

    pub fn mark_request_start(&self, group: &str, name: &str) {
        if let Some(pool) = self.pool(group) {
            if !lock(&pool).mark_request_start(name) {
                debug!(pool = group, provider = name, "mark_request_start for unknown endpoint");
            }
        }
    }

    pub fn mark_request_end(&self, group: &str, name: &str, latency_ms: f64, success: bool) {
        if let Some(pool) = self.pool(group) {
            if !lock(&pool).mark_request_end(name, latency_ms, success) {
                debug!(pool = group, provider = name, "mark_request_end for unknown endpoint");
            }
        }
    }

    /// Toggle an endpoint's eligibility; false when pool or endpoint is unknown
    pub fn update_provider_health(&self, group: &str, name: &str, is_healthy: bool) -> bool {
        let Some(pool) = self.pool(group) else {
            return false;
        };
        let updated = lock(&pool).set_health(name, is_healthy);
        if updated {
            info!(pool = group, provider = name, healthy = is_healthy, "Endpoint health updated");
        }
        updated
    }

    pub fn reset_pool_stats(&self, group: &str) -> bool {
        match self.pool(group) {
            Some(pool) => {
                lock(&pool).reset_stats();
                true
            }
            None => false,
        }
    }

    pub fn pool_stats(&self, group: &str) -> Option<PoolStats> {
        self.pool(group).map(|pool| lock(&pool).stats())
    }

    /// Stats for every pool, sorted by name
    pub fn all_stats(&self) -> Vec<PoolStats> {
        let pools: Vec<_> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut stats: Vec<PoolStats> = pools.iter().map(|p| lock(p).stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_bad_endpoints() {
        let balancer = LoadBalancer::new();
        let err = balancer
            .register_pool(
                "g",
                vec![ProviderEndpoint::new("a", 1), ProviderEndpoint::new("b", 0)],
                Strategy::RoundRobin,
            )
            .unwrap_err();
        assert_eq!(
            err,
            BalancerError::ZeroWeight {
                pool: "g".to_string(),
                endpoint: "b".to_string()
            }
        );

        let err = balancer
            .register_pool(
                "g",
                vec![ProviderEndpoint::new("a", 1), ProviderEndpoint::new("a", 2)],
                Strategy::RoundRobin,
            )
            .unwrap_err();
        assert!(matches!(err, BalancerError::DuplicateEndpoint { .. }));
        assert!(!balancer.has_pool("g"));
    }

    #[test]
    fn test_unknown_group_is_unavailable() {
        let balancer = LoadBalancer::new();
        assert_eq!(balancer.select_provider("nope", &[]), None);
        assert!(!balancer.update_provider_health("nope", "a", false));
        assert!(!balancer.reset_pool_stats("nope"));
        assert!(balancer.pool_stats("nope").is_none());
    }

    #[test]
    fn test_register_replaces_existing_pool() {
        let balancer = LoadBalancer::new();
        balancer
            .register_pool("g", vec![ProviderEndpoint::new("a", 1)], Strategy::RoundRobin)
            .unwrap();
        balancer
            .register_pool("g", vec![ProviderEndpoint::new("b", 1)], Strategy::LeastConnections)
            .unwrap();

        assert_eq!(balancer.groups(), vec!["g"]);
        assert_eq!(balancer.select_provider("g", &[]).as_deref(), Some("b"));
        assert_eq!(
            balancer.pool_stats("g").unwrap().strategy,
            Strategy::LeastConnections
        );
    }

    #[test]
    fn test_bookkeeping_through_registry() {
        let balancer = LoadBalancer::new();
        balancer
            .register_pool(
                "g",
                vec![ProviderEndpoint::new("a", 1), ProviderEndpoint::new("b", 1)],
                Strategy::WeightedRoundRobin,
            )
            .unwrap();
        balancer
            .register_pool("h", vec![ProviderEndpoint::new("c", 1)], Strategy::Random)
            .unwrap();

        balancer.mark_request_start("g", "a");
        balancer.mark_request_end("g", "a", 25.0, true);
        balancer.mark_request_start("g", "ghost");

        let stats = balancer.all_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "g");
        assert_eq!(stats[0].total_requests, 1);
        assert_eq!(stats[0].endpoints[0].avg_latency_ms, Some(25.0));

        assert!(balancer.remove_pool("h"));
        assert!(!balancer.remove_pool("h"));
        assert_eq!(balancer.groups(), vec!["g"]);
    }
}
