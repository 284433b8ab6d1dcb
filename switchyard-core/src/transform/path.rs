//! Dot-separated field paths over JSON payloads
//!
//! `messages.0.content` walks into the `messages` array by index. A numeric
//! segment against an object is treated as an ordinary key.

use super::error::{TransformError, TransformResult};
use serde_json::{Map, Value};

fn segments(path: &str) -> TransformResult<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').collect();
    if path.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(TransformError::InvalidPath {
            path: path.to_string(),
            reason: "empty segment".to_string(),
        });
    }
    Ok(parts)
}

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

/// Read a field; `None` when any segment is missing
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let parts = segments(path).ok()?;
    parts.iter().try_fold(root, |value, segment| child(value, segment))
}

/// Mutable access to an existing field
pub fn get_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let parts = segments(path).ok()?;
    let mut current = root;
    for segment in parts {
        current = child_mut(current, segment)?;
    }
    Some(current)
}

/// Write a field, creating missing intermediate objects
///
/// An array index may address an existing element or append at `len`.
pub fn set(root: &mut Value, path: &str, value: Value) -> TransformResult<()> {
    let parts = segments(path)?;
    let invalid = |reason: &str| TransformError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| invalid("empty path"))?;

    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| invalid("non-numeric index into array"))?;
                items
                    .get_mut(index)
                    .ok_or_else(|| invalid("array index out of bounds"))?
            }
            _ => return Err(invalid("cannot descend into a scalar")),
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index: usize = last
                .parse()
                .map_err(|_| invalid("non-numeric index into array"))?;
            if index < items.len() {
                items[index] = value;
            } else if index == items.len() {
                items.push(value);
            } else {
                return Err(invalid("array index out of bounds"));
            }
            Ok(())
        }
        _ => Err(invalid("cannot set a field on a scalar")),
    }
}

/// Remove a field, returning its old value
pub fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let parts = segments(path).ok()?;
    let (last, parents) = parts.split_last()?;

    let mut current = root;
    for segment in parents {
        current = child_mut(current, segment)?;
    }

    match current {
        Value::Object(map) => map.remove(*last),
        Value::Array(items) => {
            let index: usize = last.parse().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_through_arrays() {
        let payload = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(get(&payload, "messages.0.content"), Some(&json!("hi")));
        assert_eq!(get(&payload, "messages.1.content"), None);
        assert_eq!(get(&payload, "messages.x"), None);
        assert_eq!(get(&payload, ""), None);
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut payload = json!({});
        set(&mut payload, "metadata.tenant.id", json!("acme")).unwrap();
        assert_eq!(payload, json!({"metadata": {"tenant": {"id": "acme"}}}));
    }

    #[test]
    fn test_set_array_elements() {
        let mut payload = json!({"stop": ["a"]});
        set(&mut payload, "stop.0", json!("b")).unwrap();
        set(&mut payload, "stop.1", json!("c")).unwrap();
        assert_eq!(payload, json!({"stop": ["b", "c"]}));

        let err = set(&mut payload, "stop.5", json!("d")).unwrap_err();
        assert!(matches!(err, TransformError::InvalidPath { .. }));
    }

    #[test]
    fn test_set_rejects_scalar_parent() {
        let mut payload = json!({"temperature": 0.5});
        assert!(set(&mut payload, "temperature.value", json!(1)).is_err());
        assert!(set(&mut payload, "a..b", json!(1)).is_err());
    }

    #[test]
    fn test_remove() {
        let mut payload = json!({"user": "u1", "stop": ["a", "b"]});
        assert_eq!(remove(&mut payload, "user"), Some(json!("u1")));
        assert_eq!(remove(&mut payload, "stop.0"), Some(json!("a")));
        assert_eq!(remove(&mut payload, "missing.path"), None);
        assert_eq!(payload, json!({"stop": ["b"]}));
    }
}
