use thiserror::Error;

/// Result type for transform operations
pub type TransformResult<T> = Result<T, TransformError>;

/// Errors raised while registering or applying transform rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("Invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Field '{field}' is not numeric")]
    NotNumeric { field: String },

    #[error("Unknown transform function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{function}' failed on '{field}': {message}")]
    Function {
        function: String,
        field: String,
        message: String,
    },

    #[error("Invalid condition '{0}'")]
    InvalidCondition(String),

    #[error("Rules for route '{0}' are already registered")]
    DuplicateRoute(String),

    #[error("Transformed payload is not a valid request: {0}")]
    InvalidPayload(String),
}
