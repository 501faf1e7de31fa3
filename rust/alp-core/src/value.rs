//! Helpers over [`serde_json::Value`], the VM's runtime value type.
//!
//! ALP values are exactly the JSON sum type: null, bool, number (int or
//! float), string, array, object. Handlers that accept "a number" accept
//! either integer or float and promote as needed.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Truthiness rules used by conditions: `false`, `null`, `0`, `0.0`, `""`,
/// `[]`, and `{}` are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(m) => !m.is_empty(),
    }
}

/// Numeric view of a value, or `None` for non-numbers.
///
/// Booleans are deliberately not numbers here.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Integer view of a value. Accepts integer JSON numbers and floats with a
/// zero fractional part; rejects everything else.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.is_finite())
                    .map(|f| f as i64)
            }
        }
        _ => None,
    }
}

/// Build a JSON number from a float, falling back to `Null` for NaN or
/// infinity (JSON has no representation for either).
pub fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Stringify a value the way the string ops do: strings stay bare, scalars
/// use their JSON form, containers serialize compactly.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Walk a dot-separated path through objects and arrays.
///
/// Object segments are looked up by key; array segments must parse as an
/// index. Returns `None` as soon as a segment does not apply.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                current = items.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Short content hash of a value: `"h:"` plus the first 8 hex chars of the
/// SHA-256 of its canonical JSON encoding. Object keys serialize sorted, so
/// the hash is stable across key orderings.
pub fn content_hash(value: &Value) -> String {
    let encoded = serde_json::to_string(value).unwrap_or_default();
    let digest = Sha256::digest(encoded.as_bytes());
    format!("h:{}", &hex::encode(digest)[..8])
}

/// Human-oriented name of a value's JSON type, used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "int"
            } else {
                "float"
            }
        }
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
