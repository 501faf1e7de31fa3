//! Collection iteration: `map_each`.

use super::{arg, required_str, Args, OpContext, OpRegistry};
use alp_core::Result;
use serde_json::Value;

/// Call a registered function once per item, collecting results in order.
/// With `param`, each item is wrapped as `{param: item}` before the call;
/// otherwise the item itself is the inbound payload.
fn op_map_each(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let items = match arg(args, "items") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    let fn_id = required_str(args, "map_each", "fn")?;
    let param = arg(args, "param").and_then(Value::as_str).map(str::to_string);

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        ctx.cancel.check()?;
        let inbound = match &param {
            Some(name) => {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(name.clone(), item);
                Value::Object(wrapped)
            }
            None => item,
        };
        results.push(ctx.hooks.call_fn(&fn_id, inbound)?);
    }
    Ok(Value::Array(results))
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("map_each", op_map_each);
}
