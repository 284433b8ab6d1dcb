//! Selection strategies

use super::error::BalancerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a pool picks among its eligible endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Rotate through cumulative weight ranges
    #[default]
    WeightedRoundRobin,
    /// Rotate through endpoints, ignoring weight
    RoundRobin,
    /// Fewest in-flight requests, first registered wins ties
    LeastConnections,
    /// Lowest smoothed latency among endpoints that have served traffic
    LeastLatency,
    /// Weighted random draw
    Random,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::LeastLatency => "least_latency",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "weighted_round_robin" | "weighted" => Ok(Self::WeightedRoundRobin),
            "round_robin" => Ok(Self::RoundRobin),
            "least_connections" => Ok(Self::LeastConnections),
            "least_latency" => Ok(Self::LeastLatency),
            "random" => Ok(Self::Random),
            _ => Err(BalancerError::UnknownStrategy(s.to_string())),
        }
    }
}
