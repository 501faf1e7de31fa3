//! The `llm` operation — a function-body escape hatch into the LLM adapter,
//! equivalent to the `@llm` block but usable mid-pipeline.

use super::{arg, required_str, Args, OpContext, OpRegistry};
use alp_core::Result;
use serde_json::{json, Value};

fn op_llm(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let task = required_str(args, "llm", "task")?;
    let schema = required_str(args, "llm", "schema")?;
    let input = arg(args, "input").cloned().unwrap_or_else(|| json!({}));
    let provider = arg(args, "provider").and_then(Value::as_str);
    let model = arg(args, "model").and_then(Value::as_str);
    ctx.hooks.call_llm(&task, &input, &schema, provider, model)
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("llm", op_llm);
}
