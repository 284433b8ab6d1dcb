//! Switchyard Core Library
//!
//! Request dispatch and resilience for a gateway in front of several LLM
//! providers: per-provider circuit breakers, weighted load balancing,
//! declarative request/response transforms, and a dispatch engine that
//! falls back across providers, streams chunks as SSE and prices every call.

pub mod balancer;
pub mod breaker;
pub mod config;
pub mod dispatch;
pub mod protocol;
pub mod providers;
pub mod transform;

pub use balancer::{LoadBalancer, ProviderEndpoint, Strategy};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
pub use config::{ConfigError, GatewayConfig};
pub use dispatch::{
    DispatchEngine, DispatchError, DispatchResult, DispatchStream, PricingTable, RoutePolicy,
    StreamEvent,
};
pub use protocol::DispatchRequest;
pub use providers::{ProviderClient, ProviderError, ProviderRegistry};
pub use transform::{RouteRules, TransformPipeline};

/// Returns the version of the Switchyard Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
