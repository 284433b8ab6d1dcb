//! Named modifier functions for `modify` rules
//!
//! Rules refer to functions by name only. The built-in set is fixed; callers
//! may add Rust closures before the pipeline is built, never at request time.

use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A modifier takes the current value and returns its replacement
pub type ModifierFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Lookup table of modifier functions
#[derive(Clone)]
pub struct FunctionTable {
    functions: HashMap<String, ModifierFn>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionTable {
    /// Table with only the built-in functions
    pub fn builtin() -> Self {
        let mut table = Self {
            functions: HashMap::new(),
        };
        table.insert("trim", |v| map_str(v, |s| s.trim().to_string()));
        table.insert("lowercase", |v| map_str(v, |s| s.to_lowercase()));
        table.insert("uppercase", |v| map_str(v, |s| s.to_uppercase()));
        table.insert("to_string", to_string);
        table.insert("to_number", to_number);
        table.insert("round", round);
        table.insert("abs", abs);
        table
    }

    fn insert<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    /// Add or replace a function
    pub fn register<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ModifierFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Function names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("functions", &self.names())
            .finish()
    }
}

fn map_str(value: &Value, f: impl Fn(&str) -> String) -> Result<Value, String> {
    match value {
        Value::String(s) => Ok(Value::String(f(s))),
        other => Err(format!("expected a string, got {}", type_name(other))),
    }
}

fn to_string(value: &Value) -> Result<Value, String> {
    Ok(match value {
        Value::String(_) => value.clone(),
        Value::Null => Value::String(String::new()),
        other => Value::String(other.to_string()),
    })
}

fn to_number(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{}' is not a number", s))
        }
        Value::Bool(b) => Ok(Value::from(u8::from(*b))),
        other => Err(format!("cannot convert {} to a number", type_name(other))),
    }
}

fn round(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .map(|f| Value::from(f.round() as i64))
            .ok_or_else(|| "number out of range".to_string()),
        other => Err(format!("expected a number, got {}", type_name(other))),
    }
}

fn abs(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) if n.is_u64() => Ok(value.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Value::from(i.unsigned_abs()));
            }
            n.as_f64()
                .and_then(|f| Number::from_f64(f.abs()))
                .map(Value::Number)
                .ok_or_else(|| "number out of range".to_string())
        }
        other => Err(format!("expected a number, got {}", type_name(other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
