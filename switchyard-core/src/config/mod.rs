//! Configuration module for Switchyard
//!
//! Declarative description of providers, pools, routes, breaker thresholds
//! and pricing, loaded from YAML or JSON and turned into a
//! [`DispatchEngine`](crate::dispatch::DispatchEngine).

mod build;
mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::interpolate_env_vars;
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    EndpointConfig, GatewayConfig, PoolConfig, PricingConfig, ProviderConnection, RouteConfig,
    SUPPORTED_VERSION,
};
pub use secrets::{SafeLogging, SecretString};
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

fn read_config(path: &Path) -> ConfigResult<String> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;

    // Interpolate environment variables before parsing
    env::interpolate_env_vars(&content)
}

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    let content = read_config(path)?;
    parse_yaml(&content, &path.to_string_lossy())
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    let content = read_config(path)?;
    parse_json(&content, &path.to_string_lossy())
}

/// Parse and validate a YAML document that has already been interpolated
pub fn from_yaml_str(content: &str) -> ConfigResult<GatewayConfig> {
    parse_yaml(content, "<inline>")
}

/// Parse and validate a JSON document that has already been interpolated
pub fn from_json_str(content: &str) -> ConfigResult<GatewayConfig> {
    parse_json(content, "<inline>")
}

fn parse_yaml(content: &str, origin: &str) -> ConfigResult<GatewayConfig> {
    let config: GatewayConfig =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

fn parse_json(content: &str, origin: &str) -> ConfigResult<GatewayConfig> {
    let config: GatewayConfig =
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}
