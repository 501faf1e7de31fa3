//! JSON manipulation operations.
//!
//! Paths are dot-separated; numeric segments index into arrays. `json_set`
//! and `json_delete` work on a copy and return the modified document.

use super::{arg, required_str, Args, OpContext, OpRegistry};
use alp_core::value::is_truthy;
use alp_core::{AlpError, Result};
use serde_json::{json, Map, Value};

fn op_json_parse(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = required_str(args, "json_parse", "text")?;
    serde_json::from_str(&text).map_err(|e| AlpError::op(format!("json_parse failed: {e}")))
}

fn op_json_get(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let obj = args.get("obj").cloned().unwrap_or(Value::Null);
    // An empty path addresses the whole document.
    let path = super::text_arg(args, "path").unwrap_or_default();
    if path.is_empty() {
        return Ok(obj);
    }

    let mut current = &obj;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map
                    .get(segment)
                    .ok_or_else(|| AlpError::op(format!("json_get: path '{path}' not found")))?;
            }
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    AlpError::type_err(format!(
                        "json_get: segment '{segment}' must be an integer index when traversing a list"
                    ))
                })?;
                current = items
                    .get(index)
                    .ok_or_else(|| AlpError::op(format!("json_get: index {index} out of range")))?;
            }
            _ => return Err(AlpError::op(format!("json_get: path '{path}' not found"))),
        }
    }
    Ok(current.clone())
}

fn op_json_set(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let mut obj = args.get("obj").cloned().unwrap_or_else(|| json!({}));
    let path = match arg(args, "path") {
        Some(Value::String(p)) if !p.is_empty() => p.clone(),
        _ => {
            // Empty path replaces the whole document.
            return Ok(json!({"result": args.get("value").cloned().unwrap_or(Value::Null), "modified": true}));
        }
    };
    let value = args.get("value").cloned().unwrap_or(Value::Null);
    let create = arg(args, "create").and_then(Value::as_bool).unwrap_or(true);

    // Kept for error reporting when create is off; the walk below needs the
    // document mutably.
    let snapshot = if create { Value::Null } else { obj.clone() };
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = &mut obj;
    for (i, segment) in segments[..segments.len() - 1].iter().enumerate() {
        let missing = || {
            json!({
                "result": snapshot.clone(),
                "modified": false,
                "error": format!("Path not found: {}", segments[..=i].join(".")),
            })
        };
        current = match current {
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    AlpError::type_err(format!(
                        "json_set: segment '{segment}' must be an integer index when traversing a list"
                    ))
                })?;
                if items.len() <= index {
                    if !create {
                        return Ok(missing());
                    }
                    items.resize(index + 1, Value::Null);
                }
                if items[index].is_null() {
                    items[index] = json!({});
                }
                &mut items[index]
            }
            Value::Object(map) => {
                if !map.contains_key(*segment) {
                    if !create {
                        return Ok(missing());
                    }
                    map.insert(segment.to_string(), json!({}));
                }
                map.get_mut(*segment).expect("just ensured")
            }
            _ => {
                return Err(AlpError::op(format!(
                    "json_set: cannot traverse scalar at '{}'",
                    segments[..=i].join(".")
                )))
            }
        };
    }

    let last = segments[segments.len() - 1];
    match current {
        Value::Array(items) => {
            let index: usize = last.parse().map_err(|_| {
                AlpError::type_err(format!(
                    "json_set: segment '{last}' must be an integer index when traversing a list"
                ))
            })?;
            if items.len() <= index {
                if !create {
                    return Ok(json!({"result": snapshot, "modified": false, "error": format!("Path not found: {path}")}));
                }
                items.resize(index + 1, Value::Null);
            }
            items[index] = value;
        }
        Value::Object(map) => {
            map.insert(last.to_string(), value);
        }
        _ => {
            return Err(AlpError::op(format!(
                "json_set: cannot set into scalar at '{path}'"
            )))
        }
    }
    Ok(json!({"result": obj, "modified": true}))
}

/// Recursive merge: object-into-object recurses, anything else is
/// overwritten by the incoming value.
fn merge_values(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Object(a), Value::Object(b)) => {
            let mut out = a.clone();
            for (key, value) in b {
                let merged = match out.get(key) {
                    Some(current) => merge_values(current, value),
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        _ => incoming.clone(),
    }
}

fn op_json_merge(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let objects = super::required_list(args, "json_merge", "objects")?;
    let deep = arg(args, "deep").and_then(Value::as_bool).unwrap_or(false);

    let mut result = match objects.first() {
        Some(Value::Object(first)) => first.clone(),
        _ => Map::new(),
    };
    for object in objects.iter().skip(1) {
        if let Value::Object(incoming) = object {
            for (key, value) in incoming {
                let merged = match (deep, result.get(key)) {
                    (true, Some(current)) => merge_values(current, value),
                    _ => value.clone(),
                };
                result.insert(key.clone(), merged);
            }
        }
    }
    Ok(json!({"result": result}))
}

fn condition_includes(item: &Value, condition: &Map<String, Value>) -> bool {
    let pair = |key: &str| -> Option<(String, Value)> {
        match condition.get(key) {
            Some(Value::Array(parts)) if parts.len() == 2 => Some((
                parts[0].as_str().unwrap_or_default().to_string(),
                parts[1].clone(),
            )),
            _ => None,
        }
    };
    let field_value = |field: &str| -> Value {
        item.get(field).cloned().unwrap_or(Value::Null)
    };
    if let Some((field, expected)) = pair("eq") {
        return field_value(&field) == expected;
    }
    if let Some((field, expected)) = pair("ne") {
        return field_value(&field) != expected;
    }
    if let Some((field, expected)) = pair("gt") {
        let actual = alp_core::value::as_number(&field_value(&field)).unwrap_or(0.0);
        return alp_core::value::as_number(&expected)
            .map(|e| actual > e)
            .unwrap_or(false);
    }
    if let Some((field, expected)) = pair("contains") {
        let haystack = alp_core::value::to_display_string(&field_value(&field));
        let needle = alp_core::value::to_display_string(&expected);
        return haystack.contains(&needle);
    }
    false
}

fn op_json_filter(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let array = match arg(args, "array") {
        Some(Value::Array(items)) => items.clone(),
        _ => return Ok(json!({"result": [], "count": 0})),
    };
    let field = arg(args, "field").and_then(Value::as_str);
    let value = arg(args, "value");
    let condition = arg(args, "condition").and_then(Value::as_object);
    let fn_id = arg(args, "fn").and_then(Value::as_str);

    let mut kept = Vec::new();
    for item in array {
        let include = if let Some(fn_id) = fn_id {
            let result = ctx.hooks.call_fn(fn_id, item.clone())?;
            // An object result with a `value` field is judged by that field.
            match &result {
                Value::Object(map) => map.get("value").map(is_truthy).unwrap_or_else(|| is_truthy(&result)),
                other => is_truthy(other),
            }
        } else if let (Some(field), Some(expected)) = (field, value) {
            item.get(field) == Some(expected)
        } else if let Some(condition) = condition {
            condition_includes(&item, condition)
        } else {
            true
        };
        if include {
            kept.push(item);
        }
    }
    let count = kept.len();
    Ok(json!({"result": kept, "count": count}))
}

fn op_json_map(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let array = match arg(args, "array") {
        Some(Value::Array(items)) => items.clone(),
        _ => return Ok(json!({"result": [], "count": 0})),
    };
    let field = arg(args, "field").and_then(Value::as_str);
    let fn_id = arg(args, "fn").and_then(Value::as_str);

    let mut mapped = Vec::with_capacity(array.len());
    for item in array {
        if let Some(field) = field {
            mapped.push(item.get(field).cloned().unwrap_or(Value::Null));
        } else if let Some(fn_id) = fn_id {
            mapped.push(ctx.hooks.call_fn(fn_id, item)?);
        } else {
            mapped.push(item);
        }
    }
    let count = mapped.len();
    Ok(json!({"result": mapped, "count": count}))
}

fn op_json_delete(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let mut obj = args.get("obj").cloned().unwrap_or_else(|| json!({}));
    let path = match arg(args, "path") {
        Some(Value::String(p)) if !p.is_empty() => p.clone(),
        _ => return Ok(json!({"result": obj, "deleted": false})),
    };

    let segments: Vec<&str> = path.split('.').collect();
    let mut current = &mut obj;
    for segment in &segments[..segments.len() - 1] {
        let next = match current {
            Value::Object(map) => map.get_mut(*segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => {
                return Ok(json!({"result": obj, "deleted": false, "error": "Path not found"}))
            }
        }
    }

    let last = segments[segments.len() - 1];
    let deleted = match current {
        Value::Object(map) => map.remove(last).is_some(),
        Value::Array(items) => match last.parse::<usize>() {
            Ok(index) if index < items.len() => {
                items.remove(index);
                true
            }
            _ => false,
        },
        _ => false,
    };
    Ok(json!({"result": obj, "deleted": deleted}))
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("json_parse", op_json_parse);
    registry.register("json_get", op_json_get);
    registry.register("json_set", op_json_set);
    registry.register("json_merge", op_json_merge);
    registry.register("json_filter", op_json_filter);
    registry.register("json_map", op_json_map);
    registry.register("json_delete", op_json_delete);
}
