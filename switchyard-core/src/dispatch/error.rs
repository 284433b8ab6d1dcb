//! Dispatch error types and the per-call attempt log

use crate::providers::ProviderError;
use crate::transform::TransformError;
use serde::Serialize;
use thiserror::Error;

/// What happened to one candidate provider during a dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Breaker refused the call; not counted as a failure
    Rejected,
    /// No client registered under this provider name
    NoClient,
    Failed { error: ProviderError },
}

/// One entry in the attempt log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub model: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

impl AttemptRecord {
    pub(crate) fn new(provider: &str, model: &str, outcome: AttemptOutcome, latency_ms: Option<f64>) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            outcome,
            latency_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }

    /// The attempt expressed as a dispatch error, if it was not a success
    pub fn error(&self) -> Option<DispatchError> {
        match &self.outcome {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::Rejected | AttemptOutcome::NoClient => {
                Some(DispatchError::ProviderUnavailable {
                    provider: self.provider.clone(),
                })
            }
            AttemptOutcome::Failed { error } => Some(DispatchError::ProviderCallFailed {
                provider: self.provider.clone(),
                source: error.clone(),
            }),
        }
    }
}

/// Errors surfaced by the dispatch engine
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Provider skipped without a call (open breaker or no client)
    #[error("Provider '{provider}' is unavailable")]
    ProviderUnavailable { provider: String },

    /// Provider was called and failed
    #[error("Provider '{provider}' call failed: {source}")]
    ProviderCallFailed {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// Every candidate was skipped or failed
    #[error("All providers failed for route '{route}' ({} attempts)", .attempts.len())]
    AllProvidersExhausted {
        route: String,
        attempts: Vec<AttemptRecord>,
        #[source]
        last_error: Option<ProviderError>,
    },

    /// Transform rules produced an invalid payload
    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),
}

impl DispatchError {
    /// Stable machine-readable code
    pub fn code(&self) -> &str {
        match self {
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderCallFailed { source, .. } => source.code(),
            Self::AllProvidersExhausted { .. } => "all_providers_exhausted",
            Self::Transform(_) => "transform_error",
        }
    }

    /// Attempt log, when the error carries one
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::AllProvidersExhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_exhausted_carries_last_error_as_source() {
        let err = DispatchError::AllProvidersExhausted {
            route: "gpt-4".to_string(),
            attempts: vec![AttemptRecord::new("a", "gpt-4", AttemptOutcome::Rejected, None)],
            last_error: Some(ProviderError::AuthenticationError),
        };
        assert_eq!(err.to_string(), "All providers failed for route 'gpt-4' (1 attempts)");
        assert_eq!(err.source().unwrap().to_string(), "Authentication failed");
        assert_eq!(err.code(), "all_providers_exhausted");
        assert_eq!(err.attempts().len(), 1);
    }

    #[test]
    fn test_attempt_errors() {
        let rejected = AttemptRecord::new("a", "m", AttemptOutcome::Rejected, None);
        assert!(matches!(rejected.error(), Some(DispatchError::ProviderUnavailable { .. })));

        let failed = AttemptRecord::new(
            "b",
            "m",
            AttemptOutcome::Failed {
                error: ProviderError::Cancelled,
            },
            Some(3.0),
        );
        let err = failed.error().unwrap();
        assert_eq!(err.code(), "cancelled");

        let ok = AttemptRecord::new("c", "m", AttemptOutcome::Succeeded, Some(1.0));
        assert!(ok.succeeded());
        assert!(ok.error().is_none());
    }

    #[test]
    fn test_attempt_record_serialization() {
        let record = AttemptRecord::new("a", "m", AttemptOutcome::Rejected, None);
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({"provider": "a", "model": "m", "outcome": "rejected"})
        );
    }
}
