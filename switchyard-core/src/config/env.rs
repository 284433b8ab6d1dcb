//! Environment variable interpolation for configuration

use super::error::ConfigError;
use regex::{Captures, Regex};
use std::env;
use std::sync::OnceLock;

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is a valid regex")
    })
}

/// Replace `${VAR}` and `${VAR:-default}` references in raw config text
///
/// Fails on the first variable that is unset and has no default.
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing: Option<String> = None;

    let result = env_var_pattern().replace_all(content, |caps: &Captures| {
        let var_name = &caps[1];
        match (env::var(var_name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| var_name.to_string());
                caps[0].to_string()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::EnvVarNotFound { var }),
        None => Ok(result.into_owned()),
    }
}

/// Whether a value still contains an unresolved placeholder
pub fn has_placeholder(value: &str) -> bool {
    env_var_pattern().is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars() {
        env::set_var("SWITCHYARD_TEST_VAR", "test_value");

        let content = "api_key: ${SWITCHYARD_TEST_VAR}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "api_key: test_value");

        env::remove_var("SWITCHYARD_TEST_VAR");
    }

    #[test]
    fn test_missing_env_var() {
        let content = "api_key: ${SWITCHYARD_MISSING_VAR}";
        match interpolate_env_vars(content) {
            Err(ConfigError::EnvVarNotFound { var }) => assert_eq!(var, "SWITCHYARD_MISSING_VAR"),
            other => panic!("Expected EnvVarNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_values() {
        let content = "base_url: ${SWITCHYARD_UNSET_URL:-http://localhost:8080}";
        assert_eq!(
            interpolate_env_vars(content).unwrap(),
            "base_url: http://localhost:8080"
        );
    }

    #[test]
    fn test_multiple_env_vars() {
        env::set_var("SWITCHYARD_VAR1", "value1");
        env::set_var("SWITCHYARD_VAR2", "value2");

        let content = "key1: ${SWITCHYARD_VAR1}, key2: ${SWITCHYARD_VAR2}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "key1: value1, key2: value2");

        env::remove_var("SWITCHYARD_VAR1");
        env::remove_var("SWITCHYARD_VAR2");
    }

    #[test]
    fn test_has_placeholder() {
        assert!(has_placeholder("${OPENAI_API_KEY}"));
        assert!(!has_placeholder("sk-live"));
    }
}
