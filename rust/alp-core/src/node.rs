//! Typed node model and node parser.
//!
//! A program is a stream of JSON objects; each object is classified here
//! into a [`Node`] variant. Type expressions inside shapes and defs are kept
//! as raw JSON at this layer; the type registry parses them when the node
//! is registered.

use crate::error::{AlpError, ErrorKind, Location, Result};
use crate::vocab;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Node variants
// ---------------------------------------------------------------------------

/// One top-level declaration or flow in a program.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// `@def` — named type definition (alias, union, literal enum, constrained scalar).
    Def(DefNode),
    /// `@shape` — named record type.
    Shape(ShapeNode),
    /// `@tool` — external capability binding.
    Tool(ToolDecl),
    /// `@fn` — function with an op-step body.
    Fn(FnDecl),
    /// `@flow` — edges between functions (anonymous, concatenated in order).
    Flow(FlowNode),
    /// `@import` — load another program file before continuing.
    Import(ImportNode),
}

/// A `@def` node. `type_spec` is the raw type expression (string or array of
/// literals); `constraint` holds scalar constraints when present.
#[derive(Debug, Clone, PartialEq)]
pub struct DefNode {
    pub id: String,
    pub type_spec: Value,
    pub constraint: Option<Map<String, Value>>,
    pub doc: Option<String>,
}

/// A `@shape` node: ordered field-name → type-expression mapping plus
/// optional defaults applied before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeNode {
    pub id: String,
    pub fields: Map<String, Value>,
    pub defaults: Map<String, Value>,
    pub doc: Option<String>,
}

/// A `@tool` node binding a name to an external implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDecl {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Shape id validating `tool_call` args, when declared.
    pub input_schema: Option<String>,
    pub output_schema: Option<String>,
    pub implementation: ToolImpl,
}

/// How a tool is executed. Templates substitute `{arg}` placeholders by name.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolImpl {
    /// Command line run through the shell.
    Command { command: String },
    /// HTTP endpoint.
    Http {
        url: String,
        method: String,
        headers: Map<String, Value>,
        json_body: bool,
    },
    /// Python module + function, run out of process.
    Python { module: String, function: String },
}

/// A `@fn` node.
#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub id: String,
    /// Input type reference; any value accepted when absent.
    pub input: Option<String>,
    /// Output type reference; output unchecked when absent.
    pub output: Option<String>,
    /// Constants bound into the environment before the body runs.
    pub consts: Map<String, Value>,
    /// Ordered op steps.
    pub ops: Vec<OpStep>,
    /// Optional LLM call executed after the op steps.
    pub llm: Option<LlmSpec>,
    /// Optional output projection: field name → reference expression.
    pub expect: Option<Map<String, Value>>,
    /// Optional retry policy wrapping the body.
    pub retry: Option<RetryPolicy>,
}

/// One op step: `[op_name, args?, {"as": name}?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpStep {
    pub name: String,
    pub args: Map<String, Value>,
    /// Environment name the result is bound under, from step metadata.
    pub assign: Option<String>,
}

/// The `@llm` call specification of a function.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSpec {
    pub task: String,
    pub input: Map<String, Value>,
    /// Shape reference describing the expected reply structure.
    pub schema: String,
    /// Environment name the reply is bound under; defaults to `llm`.
    pub assign: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// A `@retry` policy: total attempts, base backoff, and the error kinds that
/// trigger a re-run. An empty `on` list matches every kind except `ErrType`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub on: Vec<ErrorKind>,
}

impl RetryPolicy {
    /// Whether an error of `kind` should trigger another attempt.
    pub fn matches(&self, kind: ErrorKind) -> bool {
        if self.on.is_empty() {
            kind != ErrorKind::Type
        } else {
            self.on.contains(&kind)
        }
    }

    /// Delay before the given 1-based attempt: `backoff_ms * 2^(attempt-1)`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(63);
        self.backoff_ms
            .saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX))
    }
}

/// A `@flow` node's edges.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowNode {
    pub edges: Vec<FlowEdge>,
}

/// One directed edge: `[source, destination|null, {"when": cond}?]`.
/// A null destination marks a terminal sink for the source.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEdge {
    pub source: String,
    pub dest: Option<String>,
    pub when: Option<Value>,
}

/// An `@import` node.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportNode {
    pub path: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn err(line: usize, message: impl Into<String>) -> AlpError {
    let error = AlpError::syntax(message);
    if line > 0 {
        error.at(Location::line(line))
    } else {
        error
    }
}

fn require_str(map: &Map<String, Value>, key: &str, line: usize) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(err(line, format!("'{key}' must be a non-empty string"))),
        None => Err(err(line, format!("missing '{key}'"))),
    }
}

fn optional_str(map: &Map<String, Value>, key: &str, line: usize) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(err(line, format!("'{key}' must be a string"))),
    }
}

fn optional_map(map: &Map<String, Value>, key: &str, line: usize) -> Result<Map<String, Value>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(m)) => Ok(m.clone()),
        Some(_) => Err(err(line, format!("'{key}' must be an object"))),
    }
}

/// Classify one raw JSON object into a typed [`Node`].
///
/// The object is vocabulary-normalized first, so CID kinds/keys and the
/// `@in`/`@out` aliases are accepted. Unknown kinds are `ErrSyntax` carrying
/// the source line.
pub fn parse_node(raw: Value, line: usize) -> Result<Node> {
    let mut map = match raw {
        Value::Object(m) => m,
        other => {
            return Err(err(
                line,
                format!("node must be a JSON object, got {}", crate::value::type_name(&other)),
            ))
        }
    };
    vocab::normalize_node(&mut map);

    let kind = require_str(&map, "kind", line)?;
    match kind.as_str() {
        "@shape" => parse_shape(&map, line).map(Node::Shape),
        "@def" => parse_def(&map, line).map(Node::Def),
        "@tool" => parse_tool(&map, line).map(Node::Tool),
        "@fn" => parse_fn(&map, line).map(Node::Fn),
        "@flow" => parse_flow(&map, line).map(Node::Flow),
        "@import" => Ok(Node::Import(ImportNode {
            path: require_str(&map, "path", line)?,
        })),
        other => Err(err(line, format!("unknown node kind '{other}'"))),
    }
}

fn parse_shape(map: &Map<String, Value>, line: usize) -> Result<ShapeNode> {
    Ok(ShapeNode {
        id: require_str(map, "id", line)?,
        fields: optional_map(map, "fields", line)?,
        defaults: optional_map(map, "defaults", line)?,
        doc: optional_str(map, "doc", line)?,
    })
}

fn parse_def(map: &Map<String, Value>, line: usize) -> Result<DefNode> {
    let type_spec = map
        .get("type")
        .cloned()
        .ok_or_else(|| err(line, "@def requires 'type'"))?;
    let constraint = match map.get("constraint") {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) => Some(m.clone()),
        Some(_) => return Err(err(line, "'constraint' must be an object")),
    };
    Ok(DefNode {
        id: require_str(map, "id", line)?,
        type_spec,
        constraint,
        doc: optional_str(map, "doc", line)?,
    })
}

fn parse_tool(map: &Map<String, Value>, line: usize) -> Result<ToolDecl> {
    let implementation = match map.get("implementation") {
        Some(Value::Object(imp)) => parse_tool_impl(imp, line)?,
        _ => return Err(err(line, "@tool requires an 'implementation' object")),
    };
    Ok(ToolDecl {
        id: require_str(map, "id", line)?,
        name: optional_str(map, "name", line)?,
        description: optional_str(map, "description", line)?,
        input_schema: optional_str(map, "input_schema", line)?,
        output_schema: optional_str(map, "output_schema", line)?,
        implementation,
    })
}

fn parse_tool_impl(imp: &Map<String, Value>, line: usize) -> Result<ToolImpl> {
    let impl_type = require_str(imp, "type", line)?;
    match impl_type.as_str() {
        "command" => Ok(ToolImpl::Command {
            command: require_str(imp, "command", line)?,
        }),
        "http" => Ok(ToolImpl::Http {
            url: require_str(imp, "url", line)?,
            method: optional_str(imp, "method", line)?.unwrap_or_else(|| "GET".to_string()),
            headers: optional_map(imp, "headers", line)?,
            json_body: imp
                .get("json_body")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        "python" => Ok(ToolImpl::Python {
            module: require_str(imp, "module", line)?,
            function: require_str(imp, "function", line)?,
        }),
        other => Err(err(line, format!("unsupported tool implementation type '{other}'"))),
    }
}

fn parse_fn(map: &Map<String, Value>, line: usize) -> Result<FnDecl> {
    let ops = match map.get("@op") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(steps)) => steps
            .iter()
            .map(|step| parse_op_step(step, line))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(err(line, "'@op' must be an array of steps")),
    };

    let llm = match map.get("@llm") {
        None | Some(Value::Null) => None,
        Some(Value::Object(spec)) => Some(parse_llm(spec, line)?),
        Some(_) => return Err(err(line, "'@llm' must be an object")),
    };

    let expect = match map.get("@expect") {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) => Some(m.clone()),
        Some(_) => return Err(err(line, "'@expect' must be an object")),
    };

    let retry = match map.get("@retry") {
        None | Some(Value::Null) => None,
        Some(Value::Object(spec)) => Some(parse_retry(spec, line)?),
        Some(_) => return Err(err(line, "'@retry' must be an object")),
    };

    Ok(FnDecl {
        id: require_str(map, "id", line)?,
        input: optional_str(map, "in", line)?,
        output: optional_str(map, "out", line)?,
        consts: optional_map(map, "@const", line)?,
        ops,
        llm,
        expect,
        retry,
    })
}

/// Parse a list of op steps from raw JSON, as used by the control-flow ops
/// whose branches (`then`/`else`/`do`/`catch`/`finally`) are inline step
/// lists.
pub fn parse_op_steps(raw: &Value) -> Result<Vec<OpStep>> {
    match raw {
        Value::Array(steps) => steps.iter().map(|step| parse_op_step(step, 0)).collect(),
        other => Err(AlpError::syntax(format!(
            "expected a list of op steps, got {}",
            crate::value::type_name(other)
        ))),
    }
}

fn parse_op_step(step: &Value, line: usize) -> Result<OpStep> {
    let parts = step
        .as_array()
        .ok_or_else(|| err(line, "op step must be an array [name, args?, meta?]"))?;
    let name = parts
        .first()
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(line, "op step name must be a non-empty string"))?
        .to_string();
    let args = match parts.get(1) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(_) => return Err(err(line, format!("op '{name}' arguments must be an object"))),
    };
    let assign = match parts.get(2) {
        None | Some(Value::Null) => None,
        Some(Value::Object(meta)) => match meta.get("as") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(_) => return Err(err(line, format!("op '{name}' 'as' must be a non-empty string"))),
        },
        Some(_) => return Err(err(line, format!("op '{name}' metadata must be an object"))),
    };
    Ok(OpStep { name, args, assign })
}

fn parse_llm(spec: &Map<String, Value>, line: usize) -> Result<LlmSpec> {
    Ok(LlmSpec {
        task: require_str(spec, "task", line)?,
        input: optional_map(spec, "input", line)?,
        schema: require_str(spec, "schema", line)?,
        assign: optional_str(spec, "as", line)?,
        provider: optional_str(spec, "provider", line)?,
        model: optional_str(spec, "model", line)?,
    })
}

fn parse_retry(spec: &Map<String, Value>, line: usize) -> Result<RetryPolicy> {
    // "max" is accepted as a legacy alias for "max_attempts".
    let max_attempts = spec
        .get("max_attempts")
        .or_else(|| spec.get("max"))
        .and_then(Value::as_u64)
        .ok_or_else(|| err(line, "@retry requires integer 'max_attempts'"))?;
    if max_attempts == 0 {
        return Err(err(line, "@retry 'max_attempts' must be at least 1"));
    }
    let backoff_ms = match spec.get("backoff_ms") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| err(line, "@retry 'backoff_ms' must be a non-negative integer"))?,
    };
    let on = match spec.get("on") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .map(|k| {
                k.as_str()
                    .ok_or_else(|| err(line, "@retry 'on' entries must be strings"))?
                    .parse::<ErrorKind>()
                    .map_err(|e| err(line, e))
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(err(line, "@retry 'on' must be an array of error kinds")),
    };
    Ok(RetryPolicy {
        max_attempts: max_attempts as u32,
        backoff_ms,
        on,
    })
}

fn parse_flow(map: &Map<String, Value>, line: usize) -> Result<FlowNode> {
    let raw_edges = match map.get("edges") {
        Some(Value::Array(edges)) => edges,
        _ => return Err(err(line, "@flow requires an 'edges' array")),
    };
    let mut edges = Vec::with_capacity(raw_edges.len());
    for raw in raw_edges {
        let parts = raw
            .as_array()
            .ok_or_else(|| err(line, "flow edge must be an array [src, dst, meta]"))?;
        let source = parts
            .first()
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| err(line, "flow edge source must be a non-empty string"))?
            .to_string();
        let dest = match parts.get(1) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(_) => return Err(err(line, "flow edge destination must be a string or null")),
        };
        let when = match parts.get(2) {
            None | Some(Value::Null) => None,
            Some(Value::Object(meta)) => meta.get("when").filter(|w| !w.is_null()).cloned(),
            Some(_) => return Err(err(line, "flow edge metadata must be an object")),
        };
        edges.push(FlowEdge { source, dest, when });
    }
    Ok(FlowNode { edges })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_shape_with_defaults() {
        let node = parse_node(
            json!({"kind": "@shape", "id": "Point", "fields": {"x": "int", "y?": "int"}, "defaults": {"y": 0}}),
            1,
        )
        .unwrap();
        match node {
            Node::Shape(shape) => {
                assert_eq!(shape.id, "Point");
                assert_eq!(shape.fields.len(), 2);
                assert_eq!(shape.defaults.get("y"), Some(&json!(0)));
            }
            other => panic!("expected shape, got {other:?}"),
        }
    }

    #[test]
    fn parses_fn_with_steps_and_retry() {
        let node = parse_node(
            json!({
                "kind": "@fn",
                "id": "f",
                "@in": "I",
                "@out": "O",
                "@const": {"k": 2},
                "@op": [["add", {"a": "$in.x", "b": 1}, {"as": "y"}], ["mul", {"a": "$y", "b": "$k"}]],
                "@retry": {"max_attempts": 3, "backoff_ms": 10, "on": ["ErrHTTP"]}
            }),
            4,
        )
        .unwrap();
        match node {
            Node::Fn(fn_decl) => {
                assert_eq!(fn_decl.input.as_deref(), Some("I"));
                assert_eq!(fn_decl.output.as_deref(), Some("O"));
                assert_eq!(fn_decl.ops.len(), 2);
                assert_eq!(fn_decl.ops[0].assign.as_deref(), Some("y"));
                assert!(fn_decl.ops[1].assign.is_none());
                let retry = fn_decl.retry.unwrap();
                assert_eq!(retry.max_attempts, 3);
                assert_eq!(retry.on, vec![ErrorKind::Http]);
            }
            other => panic!("expected fn, got {other:?}"),
        }
    }

    #[test]
    fn retry_accepts_legacy_max_alias() {
        let node = parse_node(
            json!({"kind": "@fn", "id": "f", "@retry": {"max": 2}}),
            1,
        )
        .unwrap();
        match node {
            Node::Fn(fn_decl) => assert_eq!(fn_decl.retry.unwrap().max_attempts, 2),
            other => panic!("expected fn, got {other:?}"),
        }
    }

    #[test]
    fn retry_matching_and_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 100,
            on: vec![ErrorKind::Http],
        };
        assert!(policy.matches(ErrorKind::Http));
        assert!(!policy.matches(ErrorKind::Io));
        assert_eq!(policy.delay_ms(1), 100);
        assert_eq!(policy.delay_ms(2), 200);
        assert_eq!(policy.delay_ms(3), 400);

        let default_on = RetryPolicy {
            max_attempts: 2,
            backoff_ms: 0,
            on: Vec::new(),
        };
        assert!(default_on.matches(ErrorKind::Http));
        assert!(!default_on.matches(ErrorKind::Type));
    }

    #[test]
    fn parses_flow_edges() {
        let node = parse_node(
            json!({"kind": "@flow", "edges": [["a", "b", {"when": {"gt": ["$value", 0]}}], ["b", null, {}]]}),
            9,
        )
        .unwrap();
        match node {
            Node::Flow(flow) => {
                assert_eq!(flow.edges.len(), 2);
                assert_eq!(flow.edges[0].dest.as_deref(), Some("b"));
                assert!(flow.edges[0].when.is_some());
                assert!(flow.edges[1].dest.is_none());
                assert!(flow.edges[1].when.is_none());
            }
            other => panic!("expected flow, got {other:?}"),
        }
    }

    #[test]
    fn parses_tool_variants() {
        let command = parse_node(
            json!({"kind": "@tool", "id": "echo", "implementation": {"type": "command", "command": "echo {text}"}}),
            1,
        )
        .unwrap();
        match command {
            Node::Tool(tool) => assert!(matches!(tool.implementation, ToolImpl::Command { .. })),
            other => panic!("expected tool, got {other:?}"),
        }

        let python = parse_node(
            json!({"kind": "@tool", "id": "py", "implementation": {"type": "python", "module": "m", "function": "f"}}),
            2,
        )
        .unwrap();
        match python {
            Node::Tool(tool) => assert!(matches!(tool.implementation, ToolImpl::Python { .. })),
            other => panic!("expected tool, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_syntax_error_with_line() {
        let result = parse_node(json!({"kind": "@bogus", "id": "x"}), 17);
        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Syntax);
        assert_eq!(error.location().unwrap().line, Some(17));
    }

    #[test]
    fn non_object_node_is_rejected() {
        assert_eq!(
            parse_node(json!([1, 2]), 3).unwrap_err().kind(),
            ErrorKind::Syntax
        );
    }
}
