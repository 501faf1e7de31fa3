//! Per-invocation environment and `$`-reference resolver.
//!
//! Each function invocation owns one [`Environment`]: `in` holds the inbound
//! value, `value` tracks the most recent op result, constants and
//! `as`-bindings add the rest. Reference strings in op arguments resolve
//! against it recursively; `$$` escapes a literal dollar sign.

use alp_core::value::get_path;
use alp_core::{AlpError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Names with fixed meaning that op metadata must not rebind.
pub const RESERVED_NAMES: &[&str] = &["in", "out", "value"];

/// Scoped name → value table, created at function entry and discarded at
/// return.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Environment::default()
    }

    /// Bind a name unconditionally (internal bindings: `in`, `value`,
    /// constants).
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Bind a name introduced by op metadata. Rejects the reserved names.
    pub fn bind_named(&mut self, name: &str, value: Value) -> Result<()> {
        if RESERVED_NAMES.contains(&name) {
            return Err(AlpError::syntax(format!(
                "binding may not shadow reserved name '{name}'"
            )));
        }
        self.vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Direct lookup of a bound name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Dotted-path lookup: the first segment names a binding, the rest walk
    /// into it. When the walk fails, the whole key is retried as a literal
    /// binding name (names may themselves contain dots).
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => return self.vars.get(path),
        };
        self.vars
            .get(head)
            .and_then(|root| get_path(root, rest))
            .or_else(|| self.vars.get(path))
    }

    /// Snapshot of the environment for `explain` output: scalars verbatim,
    /// containers reduced to their type name.
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (name, value) in &self.vars {
            let rendered = match value {
                Value::Array(_) | Value::Object(_) => {
                    Value::String(alp_core::value::type_name(value).to_string())
                }
                scalar => scalar.clone(),
            };
            out.insert(name.clone(), rendered);
        }
        out
    }
}

/// Resolve a single `$`-reference against the environment. The leading `$`
/// is required; a missing name or dead path is `ErrUnresolved`.
pub fn resolve_ref(env: &Environment, reference: &str) -> Result<Value> {
    let path = reference
        .strip_prefix('$')
        .ok_or_else(|| AlpError::unresolved(format!("'{reference}' is not a reference")))?;
    env.lookup(path)
        .cloned()
        .ok_or_else(|| AlpError::unresolved(format!("unresolved reference '{reference}'")))
}

/// Resolve one argument value recursively: reference strings substitute,
/// `$$`-prefixed strings unescape to a literal `$`, sequences and mappings
/// are walked element-wise, everything else passes through.
pub fn resolve_value(env: &Environment, value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix("$$") {
                Ok(Value::String(format!("${rest}")))
            } else if s.starts_with('$') {
                resolve_ref(env, s)
            } else {
                Ok(value.clone())
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(env, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(entries) => {
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), resolve_value(env, v)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve a whole argument mapping before an op is invoked.
pub fn resolve_args(env: &Environment, args: &Map<String, Value>) -> Result<Map<String, Value>> {
    resolve_args_except(env, args, &[])
}

/// Resolve an argument mapping, passing the named keys through verbatim.
/// Control-flow ops defer their inline branch step-lists this way; each
/// branch step's arguments resolve when that step executes.
pub fn resolve_args_except(
    env: &Environment,
    args: &Map<String, Value>,
    skip: &[&str],
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (k, v) in args {
        let resolved = if skip.contains(&k.as_str()) {
            v.clone()
        } else {
            resolve_value(env, v)?
        };
        out.insert(k.clone(), resolved);
    }
    Ok(out)
}
