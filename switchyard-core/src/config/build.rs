//! Assembling a dispatch engine from a loaded configuration

use super::error::{ConfigError, ConfigResult};
use super::schema::GatewayConfig;
use super::secrets::SafeLogging;
use crate::balancer::LoadBalancer;
use crate::breaker::CircuitBreakerManager;
use crate::dispatch::DispatchEngine;
use crate::providers::{HttpProviderClient, ProviderRegistry};
use crate::transform::{FunctionTable, TransformPipeline};
use std::sync::Arc;
use tracing::{debug, info};

impl GatewayConfig {
    /// Add an HTTP client for every configured provider
    ///
    /// Providers already present in `registry` keep their client.
    pub fn register_providers(&self, registry: &mut ProviderRegistry) -> ConfigResult<()> {
        for connection in &self.providers {
            if registry.contains(&connection.name) {
                debug!(
                    "Provider {} already registered, keeping existing client",
                    connection.name
                );
                continue;
            }

            let client = HttpProviderClient::from_connection(connection).map_err(|e| {
                ConfigError::Provider {
                    name: connection.name.clone(),
                    message: e.to_string(),
                }
            })?;
            info!("Registering provider {}", connection.safe_for_logging());
            registry.register(connection.name.clone(), Arc::new(client));
        }
        Ok(())
    }

    /// Build an engine with the built-in transform functions
    pub fn build_engine(&self, registry: ProviderRegistry) -> ConfigResult<DispatchEngine> {
        self.build_engine_with(registry, FunctionTable::builtin())
    }

    /// Build an engine whose transform rules may call `functions`
    pub fn build_engine_with(
        &self,
        mut registry: ProviderRegistry,
        functions: FunctionTable,
    ) -> ConfigResult<DispatchEngine> {
        self.register_providers(&mut registry)?;

        let breakers = Arc::new(CircuitBreakerManager::new(self.circuit_breaker.clone()));
        for (provider, config) in &self.circuit_breaker_overrides {
            breakers.configure(provider, config.clone());
        }

        let balancer = Arc::new(LoadBalancer::new());
        for pool in &self.pools {
            balancer.register_pool(&pool.name, pool.to_endpoints(), pool.strategy)?;
        }

        let mut pipeline = TransformPipeline::with_functions(functions);
        for route in &self.routes {
            if !route.transforms.is_empty() {
                pipeline.register_route(route.policy.name.clone(), route.transforms.clone())?;
            }
        }

        let builder = DispatchEngine::builder(registry)
            .breakers(breakers)
            .balancer(balancer)
            .pipeline(pipeline)
            .pricing(self.pricing.to_table())
            .settings(self.dispatch.clone());

        let engine = self
            .routes
            .iter()
            .fold(builder, |builder, route| builder.route(route.policy.clone()))
            .build();

        info!(
            providers = engine.registry().names().len(),
            pools = self.pools.len(),
            routes = self.routes.len(),
            "Dispatch engine ready"
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;

    const CONFIG: &str = r#"
version: "0.1"
circuit_breaker:
  failure_threshold: 3
circuit_breaker_overrides:
  azure:
    failure_threshold: 10
providers:
  - name: openai
    base_url: https://api.openai.com/v1
    api_key: sk-test-key-0000
  - name: azure
    base_url: https://example.openai.azure.com/v1
pools:
  - name: gpt-4
    strategy: least_connections
    endpoints:
      - name: openai
        weight: 3
      - name: azure
routes:
  - name: chat
    pool: gpt-4
    fallback_order: [azure]
    transforms:
      request:
        - op: modify
          field: model
          function: lowercase
"#;

    #[test]
    fn test_build_engine_wires_every_section() {
        let config: GatewayConfig = serde_yaml::from_str(CONFIG).unwrap();
        let engine = config.build_engine(ProviderRegistry::new()).unwrap();

        assert!(engine.registry().contains("openai"));
        assert!(engine.registry().contains("azure"));
        assert!(engine.balancer().has_pool("gpt-4"));
        assert!(engine.pipeline().has_route("chat"));
        assert_eq!(engine.route("chat").unwrap().fallback_order, vec!["azure"]);

        assert_eq!(engine.breakers().default_config().failure_threshold, 3);
        assert_eq!(
            engine.breakers().get_or_create("azure").config().failure_threshold,
            10
        );
        assert_eq!(engine.breakers().get_or_create("openai").state(), CircuitState::Closed);
    }

    #[test]
    fn test_unknown_transform_function_fails_build() {
        let yaml = CONFIG.replace("function: lowercase", "function: reverse");
        let config: GatewayConfig = serde_yaml::from_str(&yaml).unwrap();
        match config.build_engine(ProviderRegistry::new()) {
            Err(ConfigError::Transform(_)) => {}
            other => panic!("expected transform error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_custom_functions_available_to_rules() {
        let yaml = CONFIG.replace("function: lowercase", "function: reverse");
        let config: GatewayConfig = serde_yaml::from_str(&yaml).unwrap();
        let functions = FunctionTable::builtin().register("reverse", |value| {
            value
                .as_str()
                .map(|s| serde_json::Value::String(s.chars().rev().collect()))
                .ok_or_else(|| "expected a string".to_string())
        });
        assert!(config
            .build_engine_with(ProviderRegistry::new(), functions)
            .is_ok());
    }
}
