//! Function executor.
//!
//! Runs one `@fn` body: seeds the environment (constants, validated `in`),
//! executes op steps in order, performs the optional `@llm` call, projects
//! the output through `@expect`, validates against the declared output
//! type, and wraps the whole body in the function's retry policy.

use crate::loader::ProgramDef;
use alp_core::node::{FnDecl, LlmSpec, OpStep};
use alp_core::value::content_hash;
use alp_core::{AlpError, ErrorKind, Location, Result};
use alp_runtime::cancel::CancelToken;
use alp_runtime::env::{resolve_args, resolve_args_except, resolve_value, Environment};
use alp_runtime::gate::CapabilityGate;
use alp_runtime::llm::{call_llm, provider_for};
use alp_runtime::ops::{OpContext, OpRegistry, VmHooks};
use alp_runtime::RuntimeConfig;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// Validation-failure retries of a single LLM call (distinct from `@retry`,
/// which re-runs the whole body).
const LLM_REPAIR_ATTEMPTS: u32 = 3;

/// What `$value` binds to after a step: envelope results (`{value: …}`)
/// expose the inner value, everything else binds whole.
fn step_value(result: &Value) -> Value {
    match result {
        Value::Object(map) => map.get("value").cloned().unwrap_or_else(|| result.clone()),
        other => other.clone(),
    }
}

/// Executes functions of one loaded program. Stateless between invocations;
/// each call builds a fresh environment.
pub struct Executor<'a> {
    pub def: &'a ProgramDef,
    pub registry: &'a OpRegistry,
    pub gate: CapabilityGate,
    pub config: Arc<RuntimeConfig>,
    pub cancel: CancelToken,
}

impl<'a> Executor<'a> {
    pub fn new(
        def: &'a ProgramDef,
        registry: &'a OpRegistry,
        config: Arc<RuntimeConfig>,
        cancel: CancelToken,
    ) -> Self {
        Executor {
            def,
            registry,
            gate: CapabilityGate::new(config.clone()),
            config,
            cancel,
        }
    }

    /// Execute a function with the given inbound value. Returns the output
    /// and a trace record `{node, ts, outputs_hash, status, provenance}`.
    pub fn exec_fn(&self, decl: &FnDecl, inbound: Option<&Value>) -> Result<(Value, Value)> {
        let max_attempts = decl.retry.as_ref().map(|r| r.max_attempts).unwrap_or(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut provenance = Vec::new();
            match self.exec_body(decl, inbound, &mut provenance) {
                Ok(output) => {
                    let trace = json!({
                        "node": decl.id,
                        "ts": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                        "outputs_hash": content_hash(&output),
                        "status": "ok",
                        "provenance": if provenance.is_empty() { Value::Null } else { Value::Array(provenance) },
                    });
                    return Ok((output, trace));
                }
                Err(error) => {
                    let retry = match &decl.retry {
                        Some(retry) if retry.matches(error.kind()) => retry,
                        _ => return Err(error),
                    };
                    if attempt >= max_attempts {
                        return Err(AlpError::new(
                            ErrorKind::RetryExhausted,
                            format!("fn '{}' failed after {attempt} attempts", decl.id),
                        )
                        .at(Location::node(decl.id.clone()))
                        .caused_by(error));
                    }
                    let delay = retry.delay_ms(attempt);
                    tracing::warn!(
                        node = %decl.id,
                        attempt,
                        delay_ms = delay,
                        error = %error,
                        "retrying after error"
                    );
                    if delay > 0 {
                        std::thread::sleep(std::time::Duration::from_millis(delay));
                    }
                }
            }
        }
    }

    fn exec_body(
        &self,
        decl: &FnDecl,
        inbound: Option<&Value>,
        provenance: &mut Vec<Value>,
    ) -> Result<Value> {
        let at_node = |e: AlpError| e.at(Location::node(decl.id.clone()));
        let mut env = Environment::new();

        // Constants resolve with no caller scope: a `$`-reference in a
        // constant has nothing to see and errors.
        let empty = Environment::new();
        for (name, raw) in &decl.consts {
            let value = resolve_value(&empty, raw).map_err(at_node)?;
            env.set(name.clone(), value);
        }

        match (&decl.input, inbound) {
            (Some(type_ref), inbound) => {
                let raw = inbound.cloned().unwrap_or(Value::Null);
                let validated = self.def.types.validate(type_ref, &raw).map_err(at_node)?;
                env.set("in", validated);
            }
            (None, Some(value)) => env.set("in", value.clone()),
            (None, None) => {}
        }

        let mut last = self.run_steps_scoped(&decl.ops, &mut env, Some(decl.id.as_str()))?;

        if let Some(spec) = &decl.llm {
            last = self.run_llm(decl, spec, inbound, &mut env, provenance)?;
        }

        let mut output = last;
        if let Some(expect) = &decl.expect {
            let mut built = Map::new();
            for (field, expr) in expect {
                built.insert(field.clone(), resolve_value(&env, expr).map_err(at_node)?);
            }
            output = Value::Object(built);
        }
        if let Some(out_ref) = &decl.output {
            output = self.def.types.validate(out_ref, &output).map_err(at_node)?;
        }
        Ok(output)
    }

    fn run_llm(
        &self,
        decl: &FnDecl,
        spec: &LlmSpec,
        inbound: Option<&Value>,
        env: &mut Environment,
        provenance: &mut Vec<Value>,
    ) -> Result<Value> {
        let at_node = |e: AlpError| e.at(Location::node(decl.id.clone()));

        let mut input = Value::Object(resolve_args(env, &spec.input).map_err(at_node)?);
        if spec.input.is_empty() {
            if let Some(value) = inbound {
                input = value.clone();
            }
        }

        let provider = provider_for(&self.config, spec.provider.as_deref(), spec.model.as_deref())
            .map_err(at_node)?;
        let started = Instant::now();
        let result = call_llm(
            provider.as_ref(),
            &spec.task,
            &input,
            &spec.schema,
            &self.def.types,
            LLM_REPAIR_ATTEMPTS,
        )
        .map_err(at_node)?;
        provenance.push(json!({
            "kind": "llm",
            "provider": provider.name(),
            "model": provider.model(),
            "input_hash": content_hash(&input),
            "output_hash": content_hash(&result),
            "ms": started.elapsed().as_millis() as u64,
        }));

        let binding = spec.assign.as_deref().unwrap_or("llm");
        env.bind_named(binding, result.clone()).map_err(at_node)?;
        env.set("value", step_value(&result));
        Ok(result)
    }

    /// Run op steps sequentially against `env`. `node` carries the fn id for
    /// error locations and explain output; inline branch lists pass `None`.
    fn run_steps_scoped(
        &self,
        steps: &[OpStep],
        env: &mut Environment,
        node: Option<&str>,
    ) -> Result<Value> {
        let mut last = Value::Null;
        for (index, step) in steps.iter().enumerate() {
            self.cancel.check()?;
            let locate = |e: AlpError| match node {
                Some(id) => e.at(Location::op(id.to_string(), index)),
                None => e,
            };

            let handler = self
                .registry
                .get(&step.name)
                .ok_or_else(|| locate(AlpError::unresolved(format!("unknown op '{}'", step.name))))?;
            // Deferred keys (inline branch lists) stay unresolved until the
            // branch steps themselves execute.
            let args = resolve_args_except(env, &step.args, handler.deferred_args())
                .map_err(locate)?;

            tracing::debug!(op = %step.name, index, node = node.unwrap_or("<inline>"), "dispatching op");
            let ctx = OpContext {
                env: &*env,
                types: &self.def.types,
                tools: &self.def.tools,
                gate: &self.gate,
                cancel: &self.cancel,
                hooks: self,
            };
            let result = handler.invoke(&args, &ctx).map_err(locate)?;

            if let Some(name) = &step.assign {
                env.bind_named(name, result.clone()).map_err(locate)?;
            }
            env.set("value", step_value(&result));

            if self.config.explain {
                if let Some(id) = node {
                    let snapshot = json!({
                        "node": id,
                        "op_index": index,
                        "op": step.name,
                        "env_snapshot": env.snapshot(),
                    });
                    eprintln!("{snapshot}");
                }
            }
            last = result;
        }
        Ok(last)
    }
}

impl VmHooks for Executor<'_> {
    fn run_steps(&self, steps: &[OpStep], env: &Environment) -> Result<Value> {
        // Branch lists run on a scoped copy; their bindings stay local.
        let mut scope = env.clone();
        self.run_steps_scoped(steps, &mut scope, None)
    }

    fn call_fn(&self, fn_id: &str, inbound: Value) -> Result<Value> {
        let decl = self
            .def
            .fns
            .get(fn_id)
            .ok_or_else(|| AlpError::unresolved(format!("unknown fn '{fn_id}'")))?;
        self.exec_fn(decl, Some(&inbound)).map(|(value, _)| value)
    }

    fn call_llm(
        &self,
        task: &str,
        input: &Value,
        schema: &str,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Value> {
        let provider = provider_for(&self.config, provider, model)?;
        call_llm(
            provider.as_ref(),
            task,
            input,
            schema,
            &self.def.types,
            LLM_REPAIR_ATTEMPTS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alp_runtime::gate::CapabilityGate;

    fn program(source: &str) -> ProgramDef {
        let gate = CapabilityGate::new(Arc::new(RuntimeConfig::default()));
        let def = ProgramDef::load_str(source, &gate).unwrap();
        def.validate(&OpRegistry::builtin()).unwrap();
        def
    }

    fn run_fn(def: &ProgramDef, id: &str, inbound: Option<Value>) -> Result<Value> {
        let registry = OpRegistry::builtin();
        let executor = Executor::new(
            def,
            &registry,
            Arc::new(RuntimeConfig::default()),
            CancelToken::new(),
        );
        executor
            .exec_fn(def.fns.get(id).unwrap(), inbound.as_ref())
            .map(|(value, _)| value)
    }

    #[test]
    fn seeds_constants_and_input() {
        let def = program(
            r#"
            {"kind": "@shape", "id": "I", "fields": {"x": "int"}}
            {"kind": "@fn", "id": "f", "in": "I", "@const": {"k": 10},
             "@op": [["add", {"a": "$in.x", "b": "$k"}]]}
        "#,
        );
        let out = run_fn(&def, "f", Some(json!({"x": 5}))).unwrap();
        assert_eq!(out, json!(15));
    }

    #[test]
    fn input_validation_failure_is_type_error_with_node() {
        let def = program(
            r#"
            {"kind": "@shape", "id": "I", "fields": {"x": "int"}}
            {"kind": "@fn", "id": "f", "in": "I"}
        "#,
        );
        let err = run_fn(&def, "f", Some(json!({"x": "nope"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(err.location().unwrap().node.as_deref(), Some("f"));
    }

    #[test]
    fn value_tracks_every_step_and_as_binds() {
        let def = program(
            r#"
            {"kind": "@fn", "id": "f", "@op": [
                ["add", {"a": 1, "b": 2}, {"as": "three"}],
                ["mul", {"a": "$value", "b": "$three"}]
            ]}
        "#,
        );
        assert_eq!(run_fn(&def, "f", None).unwrap(), json!(9));
    }

    #[test]
    fn branch_steps_resolve_within_the_branch() {
        // `$s` is bound by the first branch step; it must resolve when the
        // second branch step runs, not when `if` is dispatched.
        let def = program(
            r#"
            {"kind": "@fn", "id": "f", "@op": [
                ["if", {"condition": true, "then": [
                    ["add", {"a": 1, "b": 1}, {"as": "s"}],
                    ["mul", {"a": "$s", "b": 10}]
                ]}]
            ]}
        "#,
        );
        assert_eq!(run_fn(&def, "f", None).unwrap(), json!(20));
    }

    #[test]
    fn value_inside_branch_tracks_branch_steps() {
        let def = program(
            r#"
            {"kind": "@fn", "id": "f", "@op": [
                ["add", {"a": 100, "b": 0}],
                ["if", {"condition": true, "then": [
                    ["add", {"a": 1, "b": 2}],
                    ["mul", {"a": "$value", "b": 10}]
                ]}]
            ]}
        "#,
        );
        // inside the branch, $value is the previous branch step's result
        // (3), not the pre-branch value (100)
        assert_eq!(run_fn(&def, "f", None).unwrap(), json!(30));
    }

    #[test]
    fn value_unwraps_envelope_results() {
        let def = program(
            r#"
            {"kind": "@fn", "id": "f", "@op": [
                ["calc_eval", {"expr": "6/2"}],
                ["add", {"a": "$value", "b": 1}]
            ]}
        "#,
        );
        assert_eq!(run_fn(&def, "f", None).unwrap(), json!(4.0));
    }

    #[test]
    fn expect_projects_and_output_validates() {
        let def = program(
            r#"
            {"kind": "@shape", "id": "I", "fields": {"x": "int"}}
            {"kind": "@shape", "id": "O", "fields": {"y": "int"}}
            {"kind": "@fn", "id": "f", "in": "I", "out": "O",
             "@op": [["add", {"a": "$in.x", "b": 1}, {"as": "y"}]],
             "@expect": {"y": "$y"}}
        "#,
        );
        let out = run_fn(&def, "f", Some(json!({"x": 41}))).unwrap();
        assert_eq!(out, json!({"y": 42}));
    }

    #[test]
    fn output_defaults_apply_through_expect() {
        let def = program(
            r#"
            {"kind": "@shape", "id": "O", "fields": {"y": "int", "unit?": "str"}, "defaults": {"unit": "ms"}}
            {"kind": "@fn", "id": "f", "out": "O",
             "@op": [["add", {"a": 1, "b": 1}, {"as": "y"}]],
             "@expect": {"y": "$y"}}
        "#,
        );
        let out = run_fn(&def, "f", None).unwrap();
        assert_eq!(out, json!({"y": 2, "unit": "ms"}));
    }

    #[test]
    fn error_location_carries_op_index() {
        let def = program(
            r#"
            {"kind": "@fn", "id": "f", "@op": [
                ["add", {"a": 1, "b": 1}],
                ["div", {"a": 1, "b": 0}]
            ]}
        "#,
        );
        let err = run_fn(&def, "f", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Math);
        let loc = err.location().unwrap();
        assert_eq!(loc.node.as_deref(), Some("f"));
        assert_eq!(loc.op_index, Some(1));
    }

    #[test]
    fn unresolved_reference_surfaces() {
        let def = program(r#"{"kind": "@fn", "id": "f", "@op": [["add", {"a": "$ghost"}]]}"#);
        assert_eq!(
            run_fn(&def, "f", None).unwrap_err().kind(),
            ErrorKind::Unresolved
        );
    }

    #[test]
    fn retry_exhausts_into_retry_exhausted() {
        // `div` by zero is ErrMath; retry on ErrMath with 3 attempts.
        let def = program(
            r#"
            {"kind": "@fn", "id": "f",
             "@op": [["div", {"a": 1, "b": 0}]],
             "@retry": {"max_attempts": 3, "backoff_ms": 0, "on": ["ErrMath"]}}
        "#,
        );
        let err = run_fn(&def, "f", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        assert_eq!(err.cause().unwrap().kind(), ErrorKind::Math);
    }

    #[test]
    fn non_matching_error_is_not_retried() {
        let def = program(
            r#"
            {"kind": "@fn", "id": "f",
             "@op": [["div", {"a": 1, "b": 0}]],
             "@retry": {"max_attempts": 3, "on": ["ErrHTTP"]}}
        "#,
        );
        let err = run_fn(&def, "f", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Math);
    }

    #[test]
    fn type_errors_are_not_retried_by_default() {
        let def = program(
            r#"
            {"kind": "@shape", "id": "I", "fields": {"x": "int"}}
            {"kind": "@fn", "id": "f", "in": "I",
             "@retry": {"max_attempts": 3}}
        "#,
        );
        let err = run_fn(&def, "f", Some(json!({"x": "bad"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn mock_llm_binds_result() {
        let def = program(
            r#"
            {"kind": "@shape", "id": "Reply", "fields": {"text": "str"}}
            {"kind": "@fn", "id": "f",
             "@llm": {"task": "echo", "input": {"text": "hi"}, "schema": "Reply", "as": "reply"},
             "@expect": {"text": "$reply.text"}}
        "#,
        );
        let out = run_fn(&def, "f", None).unwrap();
        assert_eq!(out, json!({"text": "hi"}));
    }

    #[test]
    fn trace_records_node_and_hash() {
        let def = program(r#"{"kind": "@fn", "id": "f", "@op": [["add", {"a": 1, "b": 1}]]}"#);
        let registry = OpRegistry::builtin();
        let executor = Executor::new(
            &def,
            &registry,
            Arc::new(RuntimeConfig::default()),
            CancelToken::new(),
        );
        let (value, trace) = executor
            .exec_fn(def.fns.get("f").unwrap(), None)
            .unwrap();
        assert_eq!(value, json!(2));
        assert_eq!(trace["node"], json!("f"));
        assert_eq!(trace["status"], json!("ok"));
        assert_eq!(trace["outputs_hash"], json!(content_hash(&json!(2))));
    }

    #[test]
    fn cancellation_stops_execution() {
        let def = program(r#"{"kind": "@fn", "id": "f", "@op": [["add", {"a": 1, "b": 1}]]}"#);
        let registry = OpRegistry::builtin();
        let cancel = CancelToken::new();
        cancel.cancel();
        let executor = Executor::new(
            &def,
            &registry,
            Arc::new(RuntimeConfig::default()),
            cancel,
        );
        let err = executor
            .exec_fn(def.fns.get("f").unwrap(), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
