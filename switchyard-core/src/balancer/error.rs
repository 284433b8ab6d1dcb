use thiserror::Error;

/// Errors raised when registering a pool
///
/// Selection itself never fails; an empty eligible set is reported as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    #[error("Endpoint '{endpoint}' in pool '{pool}' has zero weight")]
    ZeroWeight { pool: String, endpoint: String },

    #[error("Endpoint '{endpoint}' appears more than once in pool '{pool}'")]
    DuplicateEndpoint { pool: String, endpoint: String },

    #[error("Unknown load balancing strategy: {0}")]
    UnknownStrategy(String),
}
