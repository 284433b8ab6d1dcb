//! Transform rule definitions
//!
//! Rules are plain data so they can be loaded from configuration. Request
//! and response rules share the same shape: an operation tagged by `op` and
//! an optional condition written as `field > x`, `field < x` or `field == x`.

use super::error::TransformError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Operation applied to an outgoing request payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestOperation {
    /// Write a value; strings may reference `{var}` from the call context
    Set { field: String, value: Value },
    Remove { field: String },
    /// Replace a field with the output of a named function
    Modify { field: String, function: String },
    /// Prepend a system message, or merge into a leading one
    InjectSystemPrompt { prompt: String },
    CapValue { field: String, max: f64 },
    EnforceMin { field: String, min: f64 },
}

/// Operation applied to a provider response payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ResponseOperation {
    /// Remove fields by path
    FilterFields { fields: Vec<String> },
    /// Write extra fields; string values support `{var}` substitution
    AddMetadata { fields: Map<String, Value> },
    /// Apply a named function to each listed field
    ModifyFields {
        fields: Vec<String>,
        function: String,
    },
    /// Hide routing details from callers
    NormalizeFormat {
        #[serde(default = "default_true")]
        strip_provider_prefix: bool,
        #[serde(default)]
        drop_provider_field: bool,
    },
}

fn default_true() -> bool {
    true
}

/// A request operation with its optional gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRule {
    #[serde(flatten)]
    pub operation: RequestOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

/// A response operation with its optional gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRule {
    #[serde(flatten)]
    pub operation: ResponseOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl RequestRule {
    pub fn new(operation: RequestOperation) -> Self {
        Self {
            operation,
            condition: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

impl ResponseRule {
    pub fn new(operation: ResponseOperation) -> Self {
        Self {
            operation,
            condition: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Both rule sets for one route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteRules {
    #[serde(default)]
    pub request: Vec<RequestRule>,
    #[serde(default)]
    pub response: Vec<ResponseRule>,
}

impl RouteRules {
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }
}

/// Comparison operator in a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "==")]
    Equal,
}

impl Comparison {
    fn symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::Equal => "==",
        }
    }
}

/// `field op value` gate on a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    pub field: String,
    pub comparison: Comparison,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, comparison: Comparison, value: Value) -> Self {
        Self {
            field: field.into(),
            comparison,
            value,
        }
    }

    /// Evaluate against a payload; a missing field never matches
    pub fn matches(&self, payload: &Value) -> bool {
        let Some(actual) = super::path::get(payload, &self.field) else {
            return false;
        };

        match self.comparison {
            Comparison::GreaterThan => numeric_pair(actual, &self.value).is_some_and(|(a, b)| a > b),
            Comparison::LessThan => numeric_pair(actual, &self.value).is_some_and(|(a, b)| a < b),
            Comparison::Equal => match numeric_pair(actual, &self.value) {
                Some((a, b)) => a == b,
                None => actual == &self.value,
            },
        }
    }
}

fn numeric_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((a.as_f64()?, b.as_f64()?))
}

fn condition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z0-9_.\-]+)\s*(==|>|<)\s*([^=<>\s].*?)\s*$")
            .expect("condition pattern is a valid regex")
    })
}

impl FromStr for Condition {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = condition_pattern()
            .captures(s)
            .ok_or_else(|| TransformError::InvalidCondition(s.to_string()))?;

        let comparison = match &caps[2] {
            ">" => Comparison::GreaterThan,
            "<" => Comparison::LessThan,
            _ => Comparison::Equal,
        };

        // Bare words compare as strings
        let raw = &caps[3];
        let value = serde_json::from_str(raw).unwrap_or_else(|_| {
            Value::String(raw.trim_matches(|c| c == '\'' || c == '"').to_string())
        });

        Ok(Self::new(&caps[1], comparison, value))
    }
}

impl TryFrom<String> for Condition {
    type Error = TransformError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.to_string()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.comparison.symbol(), self.value)
    }
}
