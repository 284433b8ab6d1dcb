//! Provider pools and their endpoints

use super::strategy::Strategy;
use chrono::{DateTime, Utc};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Smoothing factor for the latency moving average
pub const LATENCY_SMOOTHING: f64 = 0.3;

/// One provider inside a pool, with its runtime counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub name: String,
    pub weight: u32,
    pub is_healthy: bool,
    #[serde(default)]
    pub active_requests: u32,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub failed_requests: u64,
    /// Exponential moving average, `None` until the first sample
    #[serde(default)]
    pub avg_latency_ms: Option<f64>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ProviderEndpoint {
    /// Healthy endpoint with zeroed counters
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
            is_healthy: true,
            active_requests: 0,
            total_requests: 0,
            failed_requests: 0,
            avg_latency_ms: None,
            last_used_at: None,
        }
    }

    pub fn with_health(mut self, is_healthy: bool) -> Self {
        self.is_healthy = is_healthy;
        self
    }

    fn record_latency(&mut self, latency_ms: f64) {
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => LATENCY_SMOOTHING * latency_ms + (1.0 - LATENCY_SMOOTHING) * avg,
            None => latency_ms,
        });
    }

    fn clear_stats(&mut self) {
        self.active_requests = 0;
        self.total_requests = 0;
        self.failed_requests = 0;
        self.avg_latency_ms = None;
        self.last_used_at = None;
    }

    fn carry_stats_from(&mut self, previous: &ProviderEndpoint) {
        self.active_requests = previous.active_requests;
        self.total_requests = previous.total_requests;
        self.failed_requests = previous.failed_requests;
        self.avg_latency_ms = previous.avg_latency_ms;
        self.last_used_at = previous.last_used_at;
    }
}

/// Named group of endpoints sharing one strategy
#[derive(Debug, Clone)]
pub struct ProviderPool {
    name: String,
    strategy: Strategy,
    endpoints: Vec<ProviderEndpoint>,
    counter: u64,
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub strategy: Strategy,
    pub endpoints: Vec<ProviderEndpoint>,
    pub total_requests: u64,
    pub active_requests: u32,
    pub healthy_endpoints: usize,
}

impl ProviderPool {
    pub fn new(name: impl Into<String>, endpoints: Vec<ProviderEndpoint>, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            endpoints,
            counter: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn endpoints(&self) -> &[ProviderEndpoint] {
        &self.endpoints
    }

    /// Swap in a new endpoint list and strategy
    ///
    /// Endpoints that survive the swap (same name) keep their runtime
    /// counters so in-flight requests still balance out.
    pub fn replace(&mut self, endpoints: Vec<ProviderEndpoint>, strategy: Strategy) {
        let mut endpoints = endpoints;
        for endpoint in &mut endpoints {
            if let Some(previous) = self.endpoints.iter().find(|e| e.name == endpoint.name) {
                endpoint.carry_stats_from(previous);
            }
        }
        self.endpoints = endpoints;
        self.strategy = strategy;
        self.counter = 0;
    }

    /// Pick an endpoint, or `None` when nothing healthy and unexcluded remains
    pub fn select(&mut self, exclude: &[String]) -> Option<String> {
        let eligible: Vec<&ProviderEndpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.is_healthy && !exclude.contains(&e.name))
            .collect();

        if eligible.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            Strategy::WeightedRoundRobin => {
                let total: u64 = eligible.iter().map(|e| u64::from(e.weight)).sum();
                let position = self.counter % total.max(1);
                self.counter = self.counter.wrapping_add(1);

                let mut cumulative = 0u64;
                eligible
                    .iter()
                    .find(|e| {
                        cumulative += u64::from(e.weight);
                        position < cumulative
                    })
                    .copied()
                    .unwrap_or(eligible[0])
            }
            Strategy::RoundRobin => {
                let index = (self.counter % eligible.len() as u64) as usize;
                self.counter = self.counter.wrapping_add(1);
                eligible[index]
            }
            Strategy::LeastConnections => eligible
                .iter()
                .min_by_key(|e| e.active_requests)
                .copied()
                .unwrap_or(eligible[0]),
            Strategy::LeastLatency => eligible
                .iter()
                .filter_map(|e| e.avg_latency_ms.map(|latency| (latency, *e)))
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(_, e)| e)
                .unwrap_or(eligible[0]),
            Strategy::Random => {
                let weights: Vec<u32> = eligible.iter().map(|e| e.weight).collect();
                match WeightedIndex::new(&weights) {
                    Ok(dist) => eligible[dist.sample(&mut thread_rng())],
                    Err(_) => eligible[0],
                }
            }
        };

        Some(chosen.name.clone())
    }

    fn endpoint_mut(&mut self, name: &str) -> Option<&mut ProviderEndpoint> {
        self.endpoints.iter_mut().find(|e| e.name == name)
    }

    /// Count a request as in flight; false when the endpoint is unknown
    pub fn mark_request_start(&mut self, name: &str) -> bool {
        match self.endpoint_mut(name) {
            Some(endpoint) => {
                endpoint.active_requests += 1;
                endpoint.total_requests += 1;
                endpoint.last_used_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Close out an in-flight request; false when the endpoint is unknown
    pub fn mark_request_end(&mut self, name: &str, latency_ms: f64, success: bool) -> bool {
        match self.endpoint_mut(name) {
            Some(endpoint) => {
                endpoint.active_requests = endpoint.active_requests.saturating_sub(1);
                if !success {
                    endpoint.failed_requests += 1;
                }
                endpoint.record_latency(latency_ms);
                true
            }
            None => false,
        }
    }

    pub fn set_health(&mut self, name: &str, is_healthy: bool) -> bool {
        match self.endpoint_mut(name) {
            Some(endpoint) => {
                endpoint.is_healthy = is_healthy;
                true
            }
            None => false,
        }
    }

    /// Zero every counter, leaving membership, weights and health alone
    pub fn reset_stats(&mut self) {
        self.counter = 0;
        for endpoint in &mut self.endpoints {
            endpoint.clear_stats();
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            strategy: self.strategy,
            endpoints: self.endpoints.clone(),
            total_requests: self.endpoints.iter().map(|e| e.total_requests).sum(),
            active_requests: self.endpoints.iter().map(|e| e.active_requests).sum(),
            healthy_endpoints: self.endpoints.iter().filter(|e| e.is_healthy).count(),
        }
    }
}
