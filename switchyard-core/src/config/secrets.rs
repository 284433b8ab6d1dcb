//! Secret values in configuration
//!
//! API keys are wrapped so they never reach logs through `Display` or
//! `Debug`. Serialization stays transparent so configs round-trip.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A wrapper type for sensitive strings like API keys
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// The raw value; only for building outgoing requests
    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Enough of the value to tell two keys apart in diagnostics
    pub fn partial_redact(&self) -> String {
        let len = self.value.chars().count();
        if len == 0 {
            return "[EMPTY]".to_string();
        }
        if len <= 8 {
            return "[REDACTED]".to_string();
        }

        let head: String = self.value.chars().take(3).collect();
        let tail: String = self.value.chars().skip(len - 4).collect();
        format!("{}...{}", head, tail)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Types that can describe themselves in logs without leaking secrets
pub trait SafeLogging {
    fn safe_for_logging(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_redaction() {
        let secret = SecretString::new("sk-1234567890abcdef");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(secret.partial_redact(), "sk-...cdef");
        assert_eq!(SecretString::new("short").partial_redact(), "[REDACTED]");
        assert_eq!(SecretString::new("").partial_redact(), "[EMPTY]");
    }

    #[test]
    fn test_secret_serializes_transparently() {
        let secret = SecretString::new("my-secret-value");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"my-secret-value\"");
        let back: SecretString = serde_json::from_str("\"my-secret-value\"").unwrap();
        assert_eq!(back.expose_secret(), "my-secret-value");
    }
}
