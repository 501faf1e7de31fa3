//! The `http` operation.
//!
//! The allow-list check happens before any socket is opened, so a denied
//! host surfaces `ErrCapability` without network traffic. Responses are
//! returned as `{status, text}`; non-2xx statuses are data, not errors.
//! The caller decides what a 404 means.

use super::{arg, required_str, text_arg, Args, OpContext, OpRegistry};
use alp_core::{AlpError, Result};
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Value};

fn op_http(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let url = required_str(args, "http", "url")?;
    let parsed = ctx.gate.check_http(&url)?;

    let method = text_arg(args, "method")
        .unwrap_or_else(|| "GET".to_string())
        .to_uppercase();
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| AlpError::op(format!("http: invalid method '{method}'")))?;

    let client = Client::builder()
        .timeout(ctx.gate.config().http_timeout)
        .build()
        .map_err(|e| AlpError::http(format!("failed to build HTTP client: {e}")))?;

    let mut request = client.request(method, parsed);
    if let Some(Value::Object(headers)) = arg(args, "headers") {
        for (name, value) in headers {
            request = request.header(name, alp_core::value::to_display_string(value));
        }
    }
    if let Some(body) = arg(args, "json") {
        request = request.json(body);
    } else if let Some(data) = text_arg(args, "data") {
        request = request.body(data);
    }

    let response = request.send().map_err(|e| {
        if e.is_timeout() {
            AlpError::timeout(format!("http request to '{url}' timed out"))
        } else {
            AlpError::http(format!("http request to '{url}' failed: {e}"))
        }
    })?;

    let status = response.status().as_u16();
    let text = response.text().map_err(|e| {
        if e.is_timeout() {
            AlpError::timeout(format!("http response from '{url}' timed out"))
        } else {
            AlpError::http(format!("failed to read response from '{url}': {e}"))
        }
    })?;
    Ok(json!({"status": status, "text": text}))
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("http", op_http);
}

#[cfg(test)]
mod tests {
    use super::super::testing::{invoke_with, NoHooks};
    use crate::config::RuntimeConfig;
    use alp_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn denied_host_is_capability_error_without_socket() {
        let err = invoke_with(
            "http",
            json!({"url": "https://api.example.com/x"}),
            &RuntimeConfig::default(),
            &NoHooks,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn local_host_is_blocked_by_default() {
        let config = RuntimeConfig::default().with_http_allowlist(["127.0.0.1"]);
        let err = invoke_with(
            "http",
            json!({"url": "http://127.0.0.1:1/x"}),
            &config,
            &NoHooks,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn missing_url_is_op_error() {
        let err = invoke_with("http", json!({}), &RuntimeConfig::default(), &NoHooks).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Op);
    }

    #[test]
    fn unreachable_allowed_host_is_http_error() {
        // Allowlisted and local-blocking disabled: the gate passes, the
        // connection itself fails (nothing listens on this port).
        let config = RuntimeConfig::default()
            .with_http_allowlist(["127.0.0.1"])
            .with_http_block_local(false)
            .with_http_timeout_secs(2);
        let err = invoke_with(
            "http",
            json!({"url": "http://127.0.0.1:9/x"}),
            &config,
            &NoHooks,
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Http | ErrorKind::Timeout));
    }
}
