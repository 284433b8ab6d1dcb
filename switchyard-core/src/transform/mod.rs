//! Request and response transform pipeline
//!
//! Each route may carry two ordered rule lists. Request rules run on the
//! outgoing payload before a provider is chosen; response rules run on the
//! caller-facing body (and on every streamed chunk). Rules always operate on
//! a copy, and routes without rules pass payloads through untouched.

pub mod error;
pub mod functions;
pub mod path;
pub mod rules;

pub use error::{TransformError, TransformResult};
pub use functions::{FunctionTable, ModifierFn};
pub use rules::{
    Comparison, Condition, RequestOperation, RequestRule, ResponseOperation, ResponseRule,
    RouteRules,
};

use crate::protocol::DispatchRequest;
use regex::{Captures, Regex};
use serde_json::{json, Number, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// Per-route rule sets plus the function table they may call
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    routes: HashMap<String, RouteRules>,
    functions: FunctionTable,
}

impl TransformPipeline {
    /// Pipeline with the built-in functions and no routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with a custom function table
    pub fn with_functions(functions: FunctionTable) -> Self {
        Self {
            routes: HashMap::new(),
            functions,
        }
    }

    /// Register the rules for a route
    ///
    /// Rules are fixed once registered. Every function a rule names must
    /// already be in the table.
    pub fn register_route(
        &mut self,
        route: impl Into<String>,
        rules: RouteRules,
    ) -> TransformResult<()> {
        let route = route.into();
        if self.routes.contains_key(&route) {
            return Err(TransformError::DuplicateRoute(route));
        }

        for function in referenced_functions(&rules) {
            if !self.functions.contains(function) {
                return Err(TransformError::UnknownFunction(function.to_string()));
            }
        }

        debug!(
            route = %route,
            request_rules = rules.request.len(),
            response_rules = rules.response.len(),
            "Registered transform rules"
        );
        self.routes.insert(route, rules);
        Ok(())
    }

    pub fn has_route(&self, route: &str) -> bool {
        self.routes.contains_key(route)
    }

    pub fn rules(&self, route: &str) -> Option<&RouteRules> {
        self.routes.get(route)
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Apply a route's request rules to a raw payload
    pub fn transform_request(
        &self,
        route: &str,
        payload: &Value,
        vars: &HashMap<String, String>,
    ) -> TransformResult<Value> {
        let mut payload = payload.clone();
        let Some(rules) = self.routes.get(route) else {
            return Ok(payload);
        };

        for rule in &rules.request {
            if let Some(condition) = &rule.condition {
                if !condition.matches(&payload) {
                    continue;
                }
            }
            self.apply_request_operation(&rule.operation, &mut payload, vars)?;
        }
        Ok(payload)
    }

    /// Apply a route's response rules to a raw payload
    pub fn transform_response(
        &self,
        route: &str,
        payload: &Value,
        vars: &HashMap<String, String>,
    ) -> TransformResult<Value> {
        let mut payload = payload.clone();
        let Some(rules) = self.routes.get(route) else {
            return Ok(payload);
        };

        for rule in &rules.response {
            if let Some(condition) = &rule.condition {
                if !condition.matches(&payload) {
                    continue;
                }
            }
            self.apply_response_operation(&rule.operation, &mut payload, vars)?;
        }
        Ok(payload)
    }

    /// Typed wrapper over [`transform_request`](Self::transform_request)
    ///
    /// The route and call context are carried over unchanged; everything
    /// else must still form a valid request after the rules run.
    pub fn apply_request(&self, request: &DispatchRequest) -> TransformResult<DispatchRequest> {
        let route = request.route_key();
        let has_rules = self
            .routes
            .get(route)
            .is_some_and(|rules| !rules.request.is_empty());
        if !has_rules {
            return Ok(request.clone());
        }

        let payload = serde_json::to_value(request)
            .map_err(|e| TransformError::InvalidPayload(e.to_string()))?;
        let transformed = self.transform_request(route, &payload, &request.context.vars())?;

        let mut result: DispatchRequest = serde_json::from_value(transformed)
            .map_err(|e| TransformError::InvalidPayload(e.to_string()))?;
        result.route = request.route.clone();
        result.context = request.context.clone();
        Ok(result)
    }

    fn apply_function(&self, name: &str, field: &str, payload: &mut Value) -> TransformResult<()> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| TransformError::UnknownFunction(name.to_string()))?;

        let Some(current) = path::get_mut(payload, field) else {
            debug!(field, function = name, "Skipping modify on missing field");
            return Ok(());
        };

        *current = function(current).map_err(|message| TransformError::Function {
            function: name.to_string(),
            field: field.to_string(),
            message,
        })?;
        Ok(())
    }

    fn apply_request_operation(
        &self,
        operation: &RequestOperation,
        payload: &mut Value,
        vars: &HashMap<String, String>,
    ) -> TransformResult<()> {
        match operation {
            RequestOperation::Set { field, value } => {
                path::set(payload, field, substitute(value, vars))
            }
            RequestOperation::Remove { field } => {
                path::remove(payload, field);
                Ok(())
            }
            RequestOperation::Modify { field, function } => {
                self.apply_function(function, field, payload)
            }
            RequestOperation::InjectSystemPrompt { prompt } => {
                inject_system_prompt(payload, substitute_str(prompt, vars))
            }
            RequestOperation::CapValue { field, max } => clamp(payload, field, |v| v.min(*max)),
            RequestOperation::EnforceMin { field, min } => clamp(payload, field, |v| v.max(*min)),
        }
    }

    fn apply_response_operation(
        &self,
        operation: &ResponseOperation,
        payload: &mut Value,
        vars: &HashMap<String, String>,
    ) -> TransformResult<()> {
        match operation {
            ResponseOperation::FilterFields { fields } => {
                for field in fields {
                    path::remove(payload, field);
                }
                Ok(())
            }
            ResponseOperation::AddMetadata { fields } => {
                for (field, value) in fields {
                    path::set(payload, field, substitute(value, vars))?;
                }
                Ok(())
            }
            ResponseOperation::ModifyFields { fields, function } => {
                for field in fields {
                    self.apply_function(function, field, payload)?;
                }
                Ok(())
            }
            ResponseOperation::NormalizeFormat {
                strip_provider_prefix,
                drop_provider_field,
            } => {
                if *strip_provider_prefix {
                    strip_model_prefix(payload);
                }
                if *drop_provider_field {
                    path::remove(payload, "provider");
                }
                Ok(())
            }
        }
    }
}

fn referenced_functions(rules: &RouteRules) -> Vec<&str> {
    let request = rules.request.iter().filter_map(|rule| match &rule.operation {
        RequestOperation::Modify { function, .. } => Some(function.as_str()),
        _ => None,
    });
    let response = rules.response.iter().filter_map(|rule| match &rule.operation {
        ResponseOperation::ModifyFields { function, .. } => Some(function.as_str()),
        _ => None,
    });
    request.chain(response).collect()
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("variable pattern is a valid regex")
    })
}

/// Replace `{var}` references; unknown variables are left as written
pub fn substitute_str(input: &str, vars: &HashMap<String, String>) -> String {
    variable_pattern()
        .replace_all(input, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// [`substitute_str`] applied to every string inside a value
pub fn substitute(value: &Value, vars: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn clamp(payload: &mut Value, field: &str, bound: impl Fn(f64) -> f64) -> TransformResult<()> {
    let Some(current) = path::get_mut(payload, field) else {
        return Ok(());
    };
    if current.is_null() {
        return Ok(());
    }

    let not_numeric = || TransformError::NotNumeric {
        field: field.to_string(),
    };
    let value = current.as_f64().ok_or_else(not_numeric)?;
    let clamped = bound(value);
    if clamped == value {
        return Ok(());
    }

    // Integers stay integers so typed fields like max_tokens still parse
    let was_integer = current.is_i64() || current.is_u64();
    *current = if was_integer && clamped.fract() == 0.0 {
        if clamped >= 0.0 {
            Value::from(clamped as u64)
        } else {
            Value::from(clamped as i64)
        }
    } else {
        Number::from_f64(clamped)
            .map(Value::Number)
            .ok_or_else(not_numeric)?
    };
    Ok(())
}

fn inject_system_prompt(payload: &mut Value, prompt: String) -> TransformResult<()> {
    let invalid = |reason: &str| TransformError::InvalidPath {
        path: "messages".to_string(),
        reason: reason.to_string(),
    };

    let root = payload
        .as_object_mut()
        .ok_or_else(|| invalid("payload is not an object"))?;
    let messages = root
        .entry("messages")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(messages) = messages else {
        return Err(invalid("not an array"));
    };

    if let Some(first) = messages.first_mut().and_then(Value::as_object_mut) {
        if first.get("role").and_then(Value::as_str) == Some("system") {
            match first.get_mut("content") {
                Some(Value::String(existing)) => {
                    *existing = format!("{}\n\n{}", prompt, existing);
                }
                Some(Value::Array(parts)) => {
                    parts.insert(0, json!({"type": "text", "text": prompt}));
                }
                _ => {
                    first.insert("content".to_string(), Value::String(prompt));
                }
            }
            return Ok(());
        }
    }

    messages.insert(0, json!({"role": "system", "content": prompt}));
    Ok(())
}

fn strip_model_prefix(payload: &mut Value) {
    let provider = payload
        .get("provider")
        .and_then(Value::as_str)
        .map(|p| format!("{}/", p));

    if let Some(Value::String(model)) = payload.get_mut("model") {
        let stripped = match &provider {
            Some(prefix) => model.strip_prefix(prefix.as_str()).map(str::to_string),
            None => model.split_once('/').map(|(_, rest)| rest.to_string()),
        };
        if let Some(stripped) = stripped {
            *model = stripped;
        }
    }
}
