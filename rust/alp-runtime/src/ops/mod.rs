//! Operation registry and dispatch.
//!
//! Ops are named handlers with a single-method interface; the registry maps
//! names to boxed handlers. The [`OpContext`] passed to each invocation
//! carries the environment (read-only from the op's perspective), the
//! registries, the capability gate, and the [`VmHooks`] seam back into the
//! executor for ops that run nested steps or call functions.

pub mod calc;
pub mod control;
pub mod fs;
pub mod http;
pub mod io;
pub mod iter;
pub mod json;
pub mod llm;
pub mod math;
pub mod strings;
pub mod tool;

use crate::cancel::CancelToken;
use crate::env::Environment;
use crate::gate::CapabilityGate;
use crate::types::TypeRegistry;
use alp_core::node::{OpStep, ToolDecl};
use alp_core::{AlpError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Resolved argument mapping handed to an op.
pub type Args = Map<String, Value>;

/// A registered operation.
pub trait OpHandler: Send + Sync {
    fn invoke(&self, args: &Args, ctx: &OpContext<'_>) -> Result<Value>;

    /// Argument keys the executor hands over unresolved. Control-flow ops
    /// defer their inline branch step-lists this way, so `$`-references
    /// inside a branch resolve against the environment the branch executes
    /// in, not the environment at dispatch time.
    fn deferred_args(&self) -> &'static [&'static str] {
        &[]
    }
}

impl<F> OpHandler for F
where
    F: Fn(&Args, &OpContext<'_>) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
        self(args, ctx)
    }
}

/// Executor services available to ops. Implemented by the VM; ops reach
/// back through this seam for nested step lists (`if`/`switch`/`try`),
/// function calls (`map_each`, `json_filter`, `json_map`), and LLM calls.
pub trait VmHooks {
    /// Run a list of op steps against a scoped copy of `env`; returns the
    /// last step's value. Bindings made inside do not leak into `env`.
    fn run_steps(&self, steps: &[OpStep], env: &Environment) -> Result<Value>;

    /// Invoke a registered function with the given inbound value.
    fn call_fn(&self, fn_id: &str, inbound: Value) -> Result<Value>;

    /// Invoke the LLM adapter; the reply is validated against `schema`.
    fn call_llm(
        &self,
        task: &str,
        input: &Value,
        schema: &str,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Value>;
}

/// Invocation context threaded through every op.
pub struct OpContext<'a> {
    pub env: &'a Environment,
    pub types: &'a TypeRegistry,
    pub tools: &'a HashMap<String, ToolDecl>,
    pub gate: &'a CapabilityGate,
    pub cancel: &'a CancelToken,
    pub hooks: &'a dyn VmHooks,
}

/// Name → handler table. Immutable after construction; shared by reference.
#[derive(Default)]
pub struct OpRegistry {
    handlers: HashMap<String, Box<dyn OpHandler>>,
}

impl std::fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OpRegistry {
    /// Empty registry (embedders composing their own op set).
    pub fn new() -> Self {
        OpRegistry::default()
    }

    /// Registry with the full standard library registered.
    pub fn builtin() -> Self {
        let mut registry = OpRegistry::new();
        math::register(&mut registry);
        calc::register(&mut registry);
        strings::register(&mut registry);
        json::register(&mut registry);
        control::register(&mut registry);
        iter::register(&mut registry);
        fs::register(&mut registry);
        http::register(&mut registry);
        io::register(&mut registry);
        tool::register(&mut registry);
        llm::register(&mut registry);
        registry
    }

    /// Register a handler under a name, replacing any previous binding.
    pub fn register(&mut self, name: impl Into<String>, handler: impl OpHandler + 'static) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<&dyn OpHandler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered op names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Shared argument accessors
// ---------------------------------------------------------------------------

/// Fetch an argument, treating JSON null as absent.
pub(crate) fn arg<'a>(args: &'a Args, key: &str) -> Option<&'a Value> {
    args.get(key).filter(|v| !v.is_null())
}

/// Display-string coercion of an argument (strings bare, scalars JSON).
pub(crate) fn text_arg(args: &Args, key: &str) -> Option<String> {
    arg(args, key).map(alp_core::value::to_display_string)
}

/// A required string-typed argument.
pub(crate) fn required_str(args: &Args, op: &str, key: &str) -> Result<String> {
    match arg(args, key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(AlpError::op(format!("{op} requires string '{key}'"))),
        None => Err(AlpError::op(format!("{op} requires '{key}'"))),
    }
}

/// A required list-typed argument.
pub(crate) fn required_list<'a>(args: &'a Args, op: &str, key: &str) -> Result<&'a Vec<Value>> {
    match arg(args, key) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(AlpError::op(format!("{op} requires list '{key}'"))),
        None => Err(AlpError::op(format!("{op} requires '{key}'"))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal fixtures for exercising ops outside the VM.

    use super::*;

    /// Hooks that fail every callback; for ops that never reach back.
    pub struct NoHooks;

    impl VmHooks for NoHooks {
        fn run_steps(&self, _steps: &[OpStep], _env: &Environment) -> Result<Value> {
            Err(AlpError::op("nested steps not available in this test"))
        }

        fn call_fn(&self, fn_id: &str, _inbound: Value) -> Result<Value> {
            Err(AlpError::unresolved(format!("unknown fn '{fn_id}'")))
        }

        fn call_llm(
            &self,
            _task: &str,
            _input: &Value,
            _schema: &str,
            _provider: Option<&str>,
            _model: Option<&str>,
        ) -> Result<Value> {
            Err(AlpError::llm("llm not available in this test"))
        }
    }

    /// Run one op against default context pieces.
    pub fn invoke(name: &str, args: Value) -> Result<Value> {
        invoke_with(name, args, &crate::config::RuntimeConfig::default(), &NoHooks)
    }

    /// Run one op with a custom config (gate decisions) and hooks.
    pub fn invoke_with(
        name: &str,
        args: Value,
        config: &crate::config::RuntimeConfig,
        hooks: &dyn VmHooks,
    ) -> Result<Value> {
        let registry = OpRegistry::builtin();
        let env = Environment::new();
        let types = TypeRegistry::new();
        let tools = HashMap::new();
        let gate = CapabilityGate::new(std::sync::Arc::new(config.clone()));
        let cancel = CancelToken::new();
        let ctx = OpContext {
            env: &env,
            types: &types,
            tools: &tools,
            gate: &gate,
            cancel: &cancel,
            hooks,
        };
        let handler = registry
            .get(name)
            .ok_or_else(|| AlpError::unresolved(format!("unknown op '{name}'")))?;
        let args = args
            .as_object()
            .cloned()
            .unwrap_or_default();
        handler.invoke(&args, &ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_the_full_op_set() {
        let registry = OpRegistry::builtin();
        for name in [
            "add", "sub", "mul", "div", "pow", "neg", "abs", "round", "min", "max", "sum", "avg",
            "calc_eval", "to_calc_result", "concat", "join", "split", "replace", "regex_match",
            "regex_replace", "format", "trim", "case", "substring", "encode_decode", "hash",
            "filter_nonempty_strings", "coalesce_str", "json_parse", "json_get", "json_set",
            "json_merge", "json_filter", "json_map", "json_delete", "if", "switch", "try",
            "map_each", "read_file", "write_file", "list_files", "file_exists", "mkdir",
            "delete_file", "path_join", "path_split", "path_basename", "http", "read_stdin",
            "tool_call", "llm",
        ] {
            assert!(registry.contains(name), "missing op '{name}'");
        }
    }

    #[test]
    fn register_accepts_plain_functions() {
        fn noop(_args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
            Ok(Value::Null)
        }
        let mut registry = OpRegistry::new();
        registry.register("noop", noop);
        assert!(registry.contains("noop"));
        assert_eq!(registry.names(), vec!["noop"]);
    }
}
