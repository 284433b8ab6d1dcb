//! Circuit breakers
//!
//! Each provider gets a breaker that tracks failures in a sliding window and
//! stops traffic to the provider once it looks down. After a cool-down the
//! breaker lets a bounded number of probe calls through to test recovery.

pub mod circuit;
pub mod manager;

pub use circuit::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
    CircuitBreakerSnapshot, CircuitState,
};
pub use manager::CircuitBreakerManager;
