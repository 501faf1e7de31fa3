//! Control-flow operations: `if`, `switch`, `try`.
//!
//! Branch payloads (`then`/`else`/`do`/`catch`/`finally`, and `switch`'s
//! `cases`/`default`) reach these ops unresolved: the handlers declare them
//! as deferred arguments, so a `$`-reference inside a branch resolves when
//! its step executes, seeing bindings made by earlier steps of the same
//! branch. Step-list branches run against a scoped copy of the caller's
//! environment and their bindings do not leak out; any other payload is
//! resolved and returned as a plain value.

use super::{arg, Args, OpContext, OpHandler, OpRegistry};
use crate::env::resolve_value;
use alp_core::condition::{eval_condition, no_refs};
use alp_core::node::parse_op_steps;
use alp_core::value::to_display_string;
use alp_core::{AlpError, Result};
use serde_json::{json, Value};

/// Evaluate a branch payload: step lists execute, anything else resolves
/// against the current environment and passes through.
fn run_branch(branch: &Value, ctx: &OpContext<'_>) -> Result<Value> {
    match branch {
        Value::Array(_) => {
            let steps = parse_op_steps(branch)?;
            ctx.hooks.run_steps(&steps, ctx.env)
        }
        other => resolve_value(ctx.env, other),
    }
}

fn op_if(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let condition = args.get("condition").cloned().unwrap_or(Value::Bool(false));
    // Operands arrive pre-resolved; reference strings left over are literals.
    let taken = eval_condition(&condition, &no_refs);
    let branch = if taken {
        arg(args, "then")
    } else {
        arg(args, "else")
    };
    match branch {
        Some(branch) => run_branch(branch, ctx),
        None => Ok(Value::Null),
    }
}

fn op_switch(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let value = args.get("value").cloned().unwrap_or(Value::Null);
    let cases = match arg(args, "cases") {
        Some(Value::Object(cases)) => cases.clone(),
        _ => return Err(AlpError::op("switch requires object 'cases'")),
    };
    let key = to_display_string(&value);
    let branch = cases.get(&key).or_else(|| arg(args, "default"));
    match branch {
        Some(branch) => run_branch(branch, ctx),
        None => Ok(Value::Null),
    }
}

fn op_try(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let do_branch = args
        .get("do")
        .ok_or_else(|| AlpError::op("try requires 'do'"))?;

    let attempt = run_branch(do_branch, ctx);
    let (result, error) = match attempt {
        Ok(value) => (value, None),
        Err(err) => {
            let caught = json!({"kind": err.kind().name(), "message": err.message()});
            let recovered = match arg(args, "catch") {
                Some(Value::Array(_)) => {
                    // catch scope sees the triggering error under `error`
                    let steps = parse_op_steps(arg(args, "catch").expect("checked above"))?;
                    let mut scope = ctx.env.clone();
                    scope.set("error", caught.clone());
                    ctx.hooks.run_steps(&steps, &scope)?
                }
                Some(other) => {
                    let mut scope = ctx.env.clone();
                    scope.set("error", caught.clone());
                    resolve_value(&scope, other)?
                }
                None => Value::Null,
            };
            (recovered, Some(caught))
        }
    };

    // finally always runs; its value is reported but never replaces the
    // branch result.
    let finally = match arg(args, "finally") {
        Some(branch) => run_branch(branch, ctx)?,
        None => Value::Null,
    };

    let success = error.is_none();
    Ok(json!({
        "result": result,
        "error": error.map(|e| e["message"].clone()).unwrap_or(Value::Null),
        "success": success,
        "finally": finally,
    }))
}

struct IfOp;

impl OpHandler for IfOp {
    fn invoke(&self, args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
        op_if(args, ctx)
    }

    fn deferred_args(&self) -> &'static [&'static str] {
        &["then", "else"]
    }
}

struct SwitchOp;

impl OpHandler for SwitchOp {
    fn invoke(&self, args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
        op_switch(args, ctx)
    }

    fn deferred_args(&self) -> &'static [&'static str] {
        &["cases", "default"]
    }
}

struct TryOp;

impl OpHandler for TryOp {
    fn invoke(&self, args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
        op_try(args, ctx)
    }

    fn deferred_args(&self) -> &'static [&'static str] {
        &["do", "catch", "finally"]
    }
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("if", IfOp);
    registry.register("switch", SwitchOp);
    registry.register("try", TryOp);
}
