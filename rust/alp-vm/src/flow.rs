//! Flow scheduler.
//!
//! Traverses the inter-function edge list depth-first: execute the current
//! function, evaluate its outgoing edges in declaration order against the
//! output (binding `$value`), and follow each activated edge to completion
//! before the next. Null destinations terminate a branch. Traversal depth
//! is bounded; exceeding the limit is `ErrFlowDepth`.

use crate::exec::Executor;
use alp_core::condition::eval_condition;
use alp_core::node::FlowEdge;
use alp_core::value::get_path;
use alp_core::{AlpError, ErrorKind, Result};
use serde_json::Value;

/// Result of one program invocation: the output of the last reached
/// function plus the per-function trace records.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: Value,
    pub traces: Vec<Value>,
}

pub struct Scheduler<'a> {
    executor: &'a Executor<'a>,
    edges: Vec<FlowEdge>,
    depth_limit: usize,
}

impl<'a> Scheduler<'a> {
    pub fn new(executor: &'a Executor<'a>, edges: Vec<FlowEdge>) -> Self {
        let depth_limit = executor.config.flow_depth_limit;
        Scheduler {
            executor,
            edges,
            depth_limit,
        }
    }

    /// Run the flow from its entry node with the given initial value.
    pub fn run(&self, initial: Option<&Value>) -> Result<RunOutcome> {
        let entry = self.entry_node()?.to_string();
        tracing::debug!(entry = %entry, edges = self.edges.len(), "starting flow traversal");
        let mut traces = Vec::new();
        let mut last = Value::Null;
        self.visit(&entry, initial, 0, &mut traces, &mut last)?;
        Ok(RunOutcome {
            result: last,
            traces,
        })
    }

    /// Entry policy: the first declared source that never appears as a
    /// destination. A flow whose every source is also a destination (a pure
    /// cycle) starts at the first edge's source.
    fn entry_node(&self) -> Result<&str> {
        if self.edges.is_empty() {
            return Err(AlpError::syntax("flow has no edges"));
        }
        let entry = self.edges.iter().map(|edge| edge.source.as_str()).find(|source| {
            !self
                .edges
                .iter()
                .any(|edge| edge.dest.as_deref() == Some(*source))
        });
        Ok(entry.unwrap_or(&self.edges[0].source))
    }

    fn visit(
        &self,
        node: &str,
        inbound: Option<&Value>,
        depth: usize,
        traces: &mut Vec<Value>,
        last: &mut Value,
    ) -> Result<()> {
        if depth >= self.depth_limit {
            return Err(AlpError::new(
                ErrorKind::FlowDepth,
                format!("flow traversal exceeded depth limit {}", self.depth_limit),
            ));
        }
        self.executor.cancel.check()?;

        let decl = self
            .executor
            .def
            .fns
            .get(node)
            .ok_or_else(|| AlpError::unresolved(format!("flow references unknown fn '{node}'")))?;
        let (output, trace) = self.executor.exec_fn(decl, inbound)?;
        traces.push(trace);
        *last = output.clone();

        for edge in self.edges.iter().filter(|edge| edge.source == node) {
            let activated = match &edge.when {
                None => true,
                Some(cond) => eval_condition(cond, &output_scope(&output)),
            };
            if !activated {
                continue;
            }
            if let Some(dest) = &edge.dest {
                self.visit(dest, Some(&output), depth + 1, traces, last)?;
            }
        }
        Ok(())
    }
}

/// Reference scope for edge conditions: `$value` is the source's output,
/// `$value.path` and bare `$path` walk into it.
fn output_scope(output: &Value) -> impl Fn(&str) -> Option<Value> + '_ {
    move |reference: &str| {
        let path = reference.strip_prefix('$')?;
        if path == "value" {
            return Some(output.clone());
        }
        let rest = path.strip_prefix("value.").unwrap_or(path);
        get_path(output, rest).cloned()
    }
}
