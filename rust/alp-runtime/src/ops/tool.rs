//! External tool invocation (`tool_call`).
//!
//! Dispatches over the `@tool` implementation variants: command lines run
//! through the shell, HTTP endpoints, and python callables run out of
//! process. Every variant consults the capability gate before executing and
//! substitutes `{name}` placeholders from the call arguments.

use super::{arg, required_str, Args, OpContext, OpRegistry};
use alp_core::node::ToolImpl;
use alp_core::value::to_display_string;
use alp_core::{AlpError, Result};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::io::Write as _;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Fill `{name}` placeholders from the argument mapping. Every placeholder
/// must have a matching argument.
fn substitute_template(template: &str, args: &Map<String, Value>) -> Result<String> {
    let placeholder = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern");
    let mut missing = None;
    let filled = placeholder.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match args.get(key) {
            Some(value) => to_display_string(value),
            None => {
                if missing.is_none() {
                    missing = Some(key.to_string());
                }
                String::new()
            }
        }
    });
    match missing {
        Some(key) => Err(AlpError::tool(format!(
            "missing argument for placeholder '{{{key}}}'"
        ))),
        None => Ok(filled.into_owned()),
    }
}

/// Run a shell command with a kill-on-expiry timeout, capturing output.
fn run_with_timeout(mut command: Command, label: &str) -> Result<std::process::Output> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AlpError::tool(format!("{label}: failed to spawn: {e}")))?;

    let deadline = Instant::now() + TOOL_TIMEOUT;
    loop {
        match child
            .try_wait()
            .map_err(|e| AlpError::tool(format!("{label}: wait failed: {e}")))?
        {
            Some(_) => break,
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AlpError::timeout(format!(
                        "{label} timed out after {}s",
                        TOOL_TIMEOUT.as_secs()
                    )));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }
    child
        .wait_with_output()
        .map_err(|e| AlpError::tool(format!("{label}: failed to collect output: {e}")))
}

fn execute_command_tool(
    command_template: &str,
    args: &Map<String, Value>,
    ctx: &OpContext<'_>,
) -> Result<Value> {
    let cmdline = substitute_template(command_template, args)?;
    ctx.gate.check_tool_command(&cmdline)?;

    let mut command = Command::new("sh");
    command.arg("-c").arg(&cmdline).stdin(Stdio::null());
    let output = run_with_timeout(command, "command tool")?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let code = output.status.code().unwrap_or(-1);
    if !output.status.success() {
        return Err(AlpError::tool(format!(
            "command failed with code {code}: {stderr}"
        )));
    }
    Ok(json!({"stdout": stdout, "stderr": stderr, "returncode": code}))
}

fn execute_http_tool(
    url_template: &str,
    method: &str,
    headers: &Map<String, Value>,
    json_body: bool,
    args: &Map<String, Value>,
    ctx: &OpContext<'_>,
) -> Result<Value> {
    let url = substitute_template(url_template, args)?;
    let parsed = ctx.gate.check_http(&url)?;

    let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| AlpError::tool(format!("http tool: invalid method '{method}'")))?;
    let client = reqwest::blocking::Client::builder()
        .timeout(ctx.gate.config().http_timeout)
        .build()
        .map_err(|e| AlpError::tool(format!("http tool: client build failed: {e}")))?;

    let mut request = client.request(method, parsed);
    for (name, value) in headers {
        request = request.header(name, to_display_string(value));
    }
    if json_body {
        request = request.json(&Value::Object(args.clone()));
    }

    let response = request.send().map_err(|e| {
        if e.is_timeout() {
            AlpError::timeout(format!("http tool request to '{url}' timed out"))
        } else {
            AlpError::tool(format!("http tool request to '{url}' failed: {e}"))
        }
    })?;

    let status = response.status().as_u16();
    let mut response_headers = Map::new();
    for (name, value) in response.headers() {
        if let Ok(text) = value.to_str() {
            response_headers.insert(name.to_string(), Value::String(text.to_string()));
        }
    }
    let text = response
        .text()
        .map_err(|e| AlpError::tool(format!("http tool: failed to read response: {e}")))?;
    let data = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok(json!({"status": status, "data": data, "headers": response_headers}))
}

fn execute_python_tool(
    module: &str,
    function: &str,
    args: &Map<String, Value>,
    ctx: &OpContext<'_>,
) -> Result<Value> {
    ctx.gate.check_tool_python(module)?;

    // The module runs out of process: args arrive as JSON on stdin, the
    // result leaves as JSON on stdout.
    let script = format!(
        "import json, sys, importlib\n\
         module = importlib.import_module('{module}')\n\
         result = getattr(module, '{function}')(json.load(sys.stdin))\n\
         print(json.dumps(result))"
    );

    let mut command = Command::new("python3");
    command.arg("-c").arg(&script).stdin(Stdio::piped());
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AlpError::tool(format!("python tool: failed to spawn: {e}")))?;

    let payload = serde_json::to_string(&Value::Object(args.clone()))
        .map_err(|e| AlpError::tool(format!("python tool: args not serializable: {e}")))?;
    child
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(payload.as_bytes())
        .map_err(|e| AlpError::tool(format!("python tool: failed to write args: {e}")))?;

    let deadline = Instant::now() + TOOL_TIMEOUT;
    loop {
        match child
            .try_wait()
            .map_err(|e| AlpError::tool(format!("python tool: wait failed: {e}")))?
        {
            Some(_) => break,
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AlpError::timeout(format!(
                        "python tool timed out after {}s",
                        TOOL_TIMEOUT.as_secs()
                    )));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }
    let output = child
        .wait_with_output()
        .map_err(|e| AlpError::tool(format!("python tool: failed to collect output: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AlpError::tool(format!(
            "python tool '{module}.{function}' failed: {stderr}"
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim())
        .map_err(|e| AlpError::tool(format!("python tool returned invalid JSON: {e}")))
}

fn op_tool_call(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let tool_id = required_str(args, "tool_call", "tool")?;
    let tool = ctx
        .tools
        .get(&tool_id)
        .ok_or_else(|| AlpError::unresolved(format!("unknown tool '{tool_id}'")))?;
    let call_args = match arg(args, "args") {
        Some(Value::Object(m)) => m.clone(),
        None => Map::new(),
        Some(_) => return Err(AlpError::op("tool_call 'args' must be an object")),
    };

    // Declared input shapes validate before any dispatch.
    if let Some(schema) = &tool.input_schema {
        if ctx.types.contains(schema) {
            ctx.types.validate(schema, &Value::Object(call_args.clone()))?;
        }
    }

    match &tool.implementation {
        ToolImpl::Command { command } => execute_command_tool(command, &call_args, ctx),
        ToolImpl::Http {
            url,
            method,
            headers,
            json_body,
        } => execute_http_tool(url, method, headers, *json_body, &call_args, ctx),
        ToolImpl::Python { module, function } => {
            execute_python_tool(module, function, &call_args, ctx)
        }
    }
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("tool_call", op_tool_call);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config::RuntimeConfig;
    use crate::env::Environment;
    use crate::gate::CapabilityGate;
    use crate::ops::testing::NoHooks;
    use crate::ops::OpRegistry;
    use crate::types::TypeRegistry;
    use alp_core::node::{parse_node, Node, ToolDecl};
    use alp_core::ErrorKind;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn tool_decl(raw: Value) -> ToolDecl {
        match parse_node(raw, 1).unwrap() {
            Node::Tool(tool) => tool,
            other => panic!("expected tool, got {other:?}"),
        }
    }

    fn call(tool: ToolDecl, args: Value, config: RuntimeConfig) -> Result<Value> {
        let registry = OpRegistry::builtin();
        let env = Environment::new();
        let types = TypeRegistry::new();
        let mut tools = HashMap::new();
        tools.insert(tool.id.clone(), tool.clone());
        let gate = CapabilityGate::new(Arc::new(config));
        let cancel = CancelToken::new();
        let ctx = OpContext {
            env: &env,
            types: &types,
            tools: &tools,
            gate: &gate,
            cancel: &cancel,
            hooks: &NoHooks,
        };
        let call_args = json!({"tool": tool.id, "args": args})
            .as_object()
            .cloned()
            .unwrap();
        registry.get("tool_call").unwrap().invoke(&call_args, &ctx)
    }

    #[test]
    fn unknown_tool_is_unresolved() {
        let registry = OpRegistry::builtin();
        let env = Environment::new();
        let types = TypeRegistry::new();
        let tools = HashMap::new();
        let gate = CapabilityGate::new(Arc::new(RuntimeConfig::default()));
        let cancel = CancelToken::new();
        let ctx = OpContext {
            env: &env,
            types: &types,
            tools: &tools,
            gate: &gate,
            cancel: &cancel,
            hooks: &NoHooks,
        };
        let args = json!({"tool": "nope"}).as_object().cloned().unwrap();
        let err = registry
            .get("tool_call")
            .unwrap()
            .invoke(&args, &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unresolved);
    }

    #[test]
    fn command_tool_denied_off_allowlist() {
        let tool = tool_decl(json!({
            "kind": "@tool", "id": "greet",
            "implementation": {"type": "command", "command": "echo {name}"}
        }));
        let err = call(tool, json!({"name": "ada"}), RuntimeConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn command_tool_runs_when_allowed() {
        let tool = tool_decl(json!({
            "kind": "@tool", "id": "greet",
            "implementation": {"type": "command", "command": "echo {name}"}
        }));
        let config = RuntimeConfig::default().with_tool_commands(["echo"]);
        let out = call(tool, json!({"name": "ada"}), config).unwrap();
        assert_eq!(out["returncode"], json!(0));
        assert_eq!(out["stdout"], json!("ada\n"));
    }

    #[test]
    fn missing_placeholder_argument_is_tool_error() {
        let tool = tool_decl(json!({
            "kind": "@tool", "id": "greet",
            "implementation": {"type": "command", "command": "echo {name}"}
        }));
        let config = RuntimeConfig::default().with_tool_commands(["echo"]);
        let err = call(tool, json!({}), config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tool);
    }

    #[test]
    fn failing_command_is_tool_error() {
        let tool = tool_decl(json!({
            "kind": "@tool", "id": "fail",
            "implementation": {"type": "command", "command": "false"}
        }));
        let config = RuntimeConfig::default().with_tool_commands(["false"]);
        let err = call(tool, json!({}), config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tool);
    }

    #[test]
    fn python_tool_denied_off_allowlist() {
        let tool = tool_decl(json!({
            "kind": "@tool", "id": "py",
            "implementation": {"type": "python", "module": "json", "function": "dumps"}
        }));
        let err = call(tool, json!({}), RuntimeConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn http_tool_denied_off_allowlist() {
        let tool = tool_decl(json!({
            "kind": "@tool", "id": "api",
            "implementation": {"type": "http", "url": "https://api.example.com/{id}"}
        }));
        let err = call(tool, json!({"id": "7"}), RuntimeConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn template_substitution() {
        let args = json!({"a": "x", "n": 2}).as_object().cloned().unwrap();
        assert_eq!(
            substitute_template("cmd {a} {n}", &args).unwrap(),
            "cmd x 2"
        );
        assert_eq!(
            substitute_template("cmd {missing}", &args)
                .unwrap_err()
                .kind(),
            ErrorKind::Tool
        );
    }
}
