//! Standard-input operation.

use super::{arg, text_arg, Args, OpContext, OpRegistry};
use alp_core::{AlpError, Result};
use serde_json::{json, Value};
use std::io::{BufRead as _, Read as _};

/// Read from stdin, gated and byte-capped. `mode` is `all` (default) or
/// `line`.
fn op_read_stdin(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let cap = ctx.gate.check_stdin()?;
    let max_bytes = arg(args, "max_bytes")
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(cap)
        .min(cap);
    let mode = text_arg(args, "mode").unwrap_or_else(|| "all".to_string());

    let stdin = std::io::stdin();
    let text = if mode == "line" {
        let mut line = String::new();
        stdin
            .lock()
            .read_line(&mut line)
            .map_err(|e| AlpError::io(format!("read_stdin: {e}")))?;
        line.chars().take(max_bytes).collect()
    } else {
        let mut buffer = Vec::with_capacity(max_bytes.min(64 * 1024));
        stdin
            .lock()
            .take(max_bytes as u64)
            .read_to_end(&mut buffer)
            .map_err(|e| AlpError::io(format!("read_stdin: {e}")))?;
        String::from_utf8_lossy(&buffer).into_owned()
    };
    Ok(json!({"text": text}))
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("read_stdin", op_read_stdin);
}
