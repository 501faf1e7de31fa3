//! Arithmetic operations.
//!
//! Handlers accept integer or float operands and promote as needed: integer
//! inputs keep integer results where the operation allows it, division is
//! always float, and division by zero is `ErrMath`.

use super::{arg, Args, OpContext, OpRegistry};
use alp_core::value::float_value;
use alp_core::{AlpError, Result};
use serde_json::{json, Value};

/// Integer-or-float operand.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn to_value(self) -> Value {
        match self {
            Num::Int(i) => json!(i),
            Num::Float(f) => float_value(f),
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Num::Int(i) => i == 0,
            Num::Float(f) => f == 0.0,
        }
    }
}

/// Read a numeric argument; absent or null counts as zero.
fn num_arg(args: &Args, op: &str, key: &str) -> Result<Num> {
    match arg(args, key) {
        None => Ok(Num::Int(0)),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Num::Int(i))
            } else {
                n.as_f64().map(Num::Float).ok_or_else(|| {
                    AlpError::type_err(format!("{op}: '{key}' is not a representable number"))
                })
            }
        }
        Some(other) => Err(AlpError::type_err(format!(
            "{op}: '{key}' must be a number, got {}",
            alp_core::value::type_name(other)
        ))),
    }
}

fn numeric_items(args: &Args, op: &str) -> Result<Option<Vec<Num>>> {
    match arg(args, "items") {
        None => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Number(n) => {
                        if let Some(v) = n.as_i64() {
                            out.push(Num::Int(v));
                        } else if let Some(v) = n.as_f64() {
                            out.push(Num::Float(v));
                        }
                    }
                    other => {
                        return Err(AlpError::type_err(format!(
                            "{op}: items[{i}] must be a number, got {}",
                            alp_core::value::type_name(other)
                        )))
                    }
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(AlpError::type_err(format!("{op}: 'items' must be a list"))),
    }
}

// Binary ops keep integer results for integer operands, falling back to
// float on overflow.
fn binary(
    args: &Args,
    op: &str,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    let a = num_arg(args, op, "a")?;
    let b = num_arg(args, op, "b")?;
    Ok(match (a, b) {
        (Num::Int(x), Num::Int(y)) => match int_op(x, y) {
            Some(result) => json!(result),
            None => float_value(float_op(x as f64, y as f64)),
        },
        _ => float_value(float_op(a.as_f64(), b.as_f64())),
    })
}

fn op_add(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    binary(args, "add", i64::checked_add, |a, b| a + b)
}

fn op_sub(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    binary(args, "sub", i64::checked_sub, |a, b| a - b)
}

fn op_mul(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    binary(args, "mul", i64::checked_mul, |a, b| a * b)
}

fn op_div(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let a = num_arg(args, "div", "a")?;
    let b = num_arg(args, "div", "b")?;
    if b.is_zero() {
        return Err(AlpError::math("division by zero in div op"));
    }
    Ok(float_value(a.as_f64() / b.as_f64()))
}

fn op_pow(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let a = num_arg(args, "pow", "a")?;
    let b = num_arg(args, "pow", "b")?;
    Ok(match (a, b) {
        (Num::Int(base), Num::Int(exp)) if (0..=u32::MAX as i64).contains(&exp) => {
            match base.checked_pow(exp as u32) {
                Some(result) => json!(result),
                None => float_value((base as f64).powf(exp as f64)),
            }
        }
        _ => float_value(a.as_f64().powf(b.as_f64())),
    })
}

fn op_neg(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    Ok(match num_arg(args, "neg", "x")? {
        Num::Int(i) => json!(-i),
        Num::Float(f) => float_value(-f),
    })
}

fn op_abs(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    Ok(match num_arg(args, "abs", "x")? {
        Num::Int(i) => json!(i.abs()),
        Num::Float(f) => float_value(f.abs()),
    })
}

/// `round` uses away-from-zero at the .5 boundary. Without `ndigits` the
/// result is an integer; with `ndigits` it stays a float.
fn op_round(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let x = num_arg(args, "round", "x")?.as_f64();
    match arg(args, "ndigits") {
        None => Ok(json!(x.round() as i64)),
        Some(nd) => {
            let nd = nd
                .as_i64()
                .ok_or_else(|| AlpError::type_err("round: 'ndigits' must be an integer"))?;
            let scale = 10f64.powi(nd as i32);
            Ok(float_value((x * scale).round() / scale))
        }
    }
}

fn extremum(args: &Args, op: &str, pick_right: impl Fn(f64, f64) -> bool) -> Result<Value> {
    if let Some(items) = numeric_items(args, op)? {
        if items.is_empty() {
            return Ok(json!(0));
        }
        let mut best = items[0];
        for item in &items[1..] {
            if pick_right(best.as_f64(), item.as_f64()) {
                best = *item;
            }
        }
        return Ok(best.to_value());
    }
    let a = num_arg(args, op, "a")?;
    let b = num_arg(args, op, "b")?;
    Ok(if pick_right(a.as_f64(), b.as_f64()) {
        b.to_value()
    } else {
        a.to_value()
    })
}

fn op_min(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    extremum(args, "min", |best, candidate| candidate < best)
}

fn op_max(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    extremum(args, "max", |best, candidate| candidate > best)
}

fn op_sum(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let items = numeric_items(args, "sum")?
        .ok_or_else(|| AlpError::op("sum expects list 'items'"))?;
    Ok(float_value(items.iter().map(|n| n.as_f64()).sum()))
}

fn op_avg(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let items = numeric_items(args, "avg")?
        .ok_or_else(|| AlpError::op("avg expects list 'items'"))?;
    if items.is_empty() {
        return Ok(float_value(0.0));
    }
    let total: f64 = items.iter().map(|n| n.as_f64()).sum();
    Ok(float_value(total / items.len() as f64))
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("add", op_add);
    registry.register("sub", op_sub);
    registry.register("mul", op_mul);
    registry.register("div", op_div);
    registry.register("pow", op_pow);
    registry.register("neg", op_neg);
    registry.register("abs", op_abs);
    registry.register("round", op_round);
    registry.register("min", op_min);
    registry.register("max", op_max);
    registry.register("sum", op_sum);
    registry.register("avg", op_avg);
}
