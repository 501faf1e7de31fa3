//! LLM adapter: provider trait, mock/OpenAI/Anthropic implementations, and
//! the schema-validated call loop.
//!
//! Providers receive the task, the (resolved) input value, and a JSON
//! Schema projected from the target shape; they return candidate JSON.
//! [`call_llm`] validates each candidate against the shape and re-prompts
//! with the validation error wrapped into the input until the candidate
//! passes or attempts run out.

use crate::config::RuntimeConfig;
use crate::types::TypeRegistry;
use alp_core::{AlpError, Result};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// A model backend. Implementations must be safe for concurrent use.
pub trait LlmProvider: Send + Sync {
    /// Provider name as it appears in provenance records.
    fn name(&self) -> &str;

    /// Model identifier in use.
    fn model(&self) -> &str;

    /// Produce a candidate value for the given task/input/schema.
    fn complete(&self, task: &str, input: &Value, schema: &Value) -> Result<Value>;
}

impl std::fmt::Debug for dyn LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("name", &self.name())
            .field("model", &self.model())
            .finish()
    }
}

/// Build the provider selected by configuration, honoring per-call
/// overrides from `@llm.provider` / `@llm.model`.
pub fn provider_for(
    config: &RuntimeConfig,
    provider_override: Option<&str>,
    model_override: Option<&str>,
) -> Result<Box<dyn LlmProvider>> {
    let provider = provider_override
        .unwrap_or(&config.model_provider)
        .to_lowercase();
    let model = model_override
        .map(str::to_string)
        .or_else(|| config.model_name.clone());
    match provider.as_str() {
        "mock" => Ok(Box::new(MockProvider)),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| AlpError::llm("OPENAI_API_KEY is not set"))?;
            Ok(Box::new(OpenAiProvider {
                api_key,
                model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
                timeout: config.http_timeout,
            }))
        }
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY")
                .map_err(|_| AlpError::llm("ANTHROPIC_API_KEY is not set"))?;
            Ok(Box::new(AnthropicProvider {
                api_key,
                model: model.unwrap_or_else(|| "claude-3-5-sonnet-20240620".to_string()),
                timeout: config.http_timeout,
            }))
        }
        other => Err(AlpError::llm(format!("unknown model provider '{other}'"))),
    }
}

/// Call the provider and validate the reply against `schema_name`,
/// re-prompting on validation failure with the error folded into the input
/// as `{original, error}`. Exhaustion surfaces `ErrLLM` carrying the last
/// failure as its cause.
pub fn call_llm(
    provider: &dyn LlmProvider,
    task: &str,
    input: &Value,
    schema_name: &str,
    types: &TypeRegistry,
    attempts: u32,
) -> Result<Value> {
    let schema = types.shape_to_json_schema(schema_name)?;
    let attempts = attempts.max(1);
    let mut input = input.clone();
    let mut last_err: Option<AlpError> = None;

    for attempt in 1..=attempts {
        tracing::debug!(provider = provider.name(), attempt, "llm call");
        let failure = match provider.complete(task, &input, &schema) {
            Ok(candidate) => match types.validate(schema_name, &candidate) {
                Ok(valid) => return Ok(valid),
                Err(err) => err,
            },
            Err(err) => err,
        };
        input = json!({"original": input, "error": failure.message()});
        last_err = Some(failure);
    }

    let error = AlpError::llm(format!(
        "model reply failed schema validation after {attempts} attempts"
    ));
    Err(match last_err {
        Some(cause) => error.caused_by(cause),
        None => error,
    })
}

// ---------------------------------------------------------------------------
// Mock provider
// ---------------------------------------------------------------------------

/// Deterministic provider for tests and offline runs: synthesizes a value
/// that satisfies the schema, carrying obvious input text through string
/// fields where available.
pub struct MockProvider;

impl MockProvider {
    fn default_for(prop: &Value, input: &Value) -> Value {
        match prop.get("type").and_then(Value::as_str) {
            Some("string") => {
                let carried = input
                    .get("text")
                    .and_then(Value::as_str)
                    .or_else(|| {
                        input
                            .get("greeting")
                            .and_then(|g| g.get("text"))
                            .and_then(Value::as_str)
                    })
                    .unwrap_or("");
                Value::String(carried.to_string())
            }
            Some("number") => json!(0),
            Some("boolean") => Value::Bool(false),
            Some("array") => json!([]),
            Some("object") => json!({}),
            _ => Value::Null,
        }
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn complete(&self, _task: &str, input: &Value, schema: &Value) -> Result<Value> {
        let props = schema
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Map::new();
        for key in required {
            let key = match key.as_str() {
                Some(key) => key.to_string(),
                None => continue,
            };
            let prop = props.get(&key).cloned().unwrap_or(Value::Null);
            out.insert(key, Self::default_for(&prop, input));
        }
        Ok(Value::Object(out))
    }
}

// ---------------------------------------------------------------------------
// OpenAI provider
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    api_key: String,
    model: String,
    timeout: Duration,
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, task: &str, input: &Value, schema: &Value) -> Result<Value> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AlpError::llm(format!("openai client build failed: {e}")))?;

        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": "You are a JSON generator. Output ONLY JSON that strictly matches the provided JSON Schema."},
                {"role": "user", "content": json!({"task": task, "input": input, "json_schema": schema}).to_string()}
            ]
        });
        let response = client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AlpError::timeout("openai request timed out")
                } else {
                    AlpError::llm(format!("openai request failed: {e}"))
                }
            })?;
        let status = response.status();
        let payload: Value = response
            .json()
            .map_err(|e| AlpError::llm(format!("openai reply was not JSON: {e}")))?;
        if !status.is_success() {
            return Err(AlpError::llm(format!(
                "openai returned status {status}: {payload}"
            )));
        }
        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AlpError::llm("openai reply carried no message content"))?;
        coerce_json(text)
    }
}

// ---------------------------------------------------------------------------
// Anthropic provider
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    timeout: Duration,
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, task: &str, input: &Value, schema: &Value) -> Result<Value> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AlpError::llm(format!("anthropic client build failed: {e}")))?;

        let prompt = format!(
            "Task: {task}\nInput: {}\nSchema Title: {}\nRespond with JSON only.",
            input,
            schema.get("title").and_then(Value::as_str).unwrap_or("")
        );
        let body = json!({
            "model": self.model,
            "max_tokens": 512,
            "temperature": 0.2,
            "system": "Return ONLY JSON matching the provided JSON structure. No explanations.",
            "messages": [{"role": "user", "content": [{"type": "text", "text": prompt}]}]
        });
        let response = client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AlpError::timeout("anthropic request timed out")
                } else {
                    AlpError::llm(format!("anthropic request failed: {e}"))
                }
            })?;
        let status = response.status();
        let payload: Value = response
            .json()
            .map_err(|e| AlpError::llm(format!("anthropic reply was not JSON: {e}")))?;
        if !status.is_success() {
            return Err(AlpError::llm(format!(
                "anthropic returned status {status}: {payload}"
            )));
        }
        let text: String = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        coerce_json(&text)
    }
}

/// Parse model output as JSON, falling back to the first `{…}` substring
/// when the model wrapped its reply in prose.
fn coerce_json(text: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(AlpError::llm("model did not return JSON"))
}
