//! JSON path helpers
//!
//! Plain dotted paths (`data.orders.pageInfo`, `items[0]`, `items[-1]`) are
//! resolved by hand. Anything with wildcards or filters goes through
//! jsonpath-rust.

use crate::error::{Error, Result};
use serde_json::Value;

/// Whether a path needs the full JSONPath engine
fn is_complex(path: &str) -> bool {
    path.contains('*') || path.contains("..") || path.contains('?')
}

/// Resolve a dotted path by reference
pub fn select<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let path = path.strip_prefix('$').unwrap_or(path);
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        if let Some(bracket_pos) = part.find('[') {
            let name = &part[..bracket_pos];
            let index_str = part[bracket_pos + 1..].trim_end_matches(']');

            if !name.is_empty() {
                current = current.get(name)?;
            }

            let index: i64 = index_str.parse().ok()?;
            let arr = current.as_array()?;
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_possible_wrap
            )]
            let idx = if index < 0 {
                (arr.len() as i64 + index) as usize
            } else {
                index as usize
            };
            current = arr.get(idx)?;
        } else {
            current = current.get(part)?;
        }
    }

    Some(current)
}

/// Resolve a path, using jsonpath-rust for wildcard expressions
///
/// Wildcard expressions return the first match.
pub fn select_value(value: &Value, path: &str) -> Result<Option<Value>> {
    if !is_complex(path) {
        return Ok(select(value, path).cloned());
    }
    Ok(find_all(value, path)?.into_iter().find(|v| !v.is_null()))
}

/// Every match of a JSONPath expression
pub fn find_all(value: &Value, path: &str) -> Result<Vec<Value>> {
    use jsonpath_rust::JsonPath;

    if !is_complex(path) {
        return Ok(select(value, path).cloned().into_iter().collect());
    }

    let jp = JsonPath::try_from(path)
        .map_err(|e| Error::json_path(format!("Invalid JSONPath '{path}': {e}")))?;

    match jp.find(value) {
        Value::Array(arr) => Ok(arr),
        Value::Null => Ok(vec![]),
        other => Ok(vec![other]),
    }
}

/// Resolve a path to a string (numbers and booleans are stringified)
pub fn select_string(value: &Value, path: &str) -> Option<String> {
    match select(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve a path to a number (numeric strings are parsed)
pub fn select_f64(value: &Value, path: &str) -> Result<Option<f64>> {
    Ok(select_value(value, path)?.as_ref().and_then(as_f64))
}

/// Numeric view of a JSON scalar
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
