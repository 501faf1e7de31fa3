//! Program loader.
//!
//! Reads newline-delimited JSON, tolerating blank lines and `//` comments,
//! classifies each line through the node parser, and registers declarations
//! in a single pass with forward-reference tolerance; references are
//! checked afterwards by [`ProgramDef::validate`]. `@import` nodes load the
//! referenced file first; imports are deduplicated by canonical path, and a
//! file importing itself (directly or through a chain) is `ErrSyntax`.

use alp_core::node::{parse_node, FlowEdge, FnDecl, Node, ToolDecl};
use alp_core::{AlpError, Location, Result};
use alp_runtime::env::RESERVED_NAMES;
use alp_runtime::gate::CapabilityGate;
use alp_runtime::ops::OpRegistry;
use alp_runtime::types::TypeRegistry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// A loaded program: registries plus the flow edges in declaration order.
#[derive(Debug, Default)]
pub struct ProgramDef {
    pub types: TypeRegistry,
    pub fns: BTreeMap<String, FnDecl>,
    pub tools: HashMap<String, ToolDecl>,
    pub flow: Vec<FlowEdge>,
}

impl ProgramDef {
    /// Load a program from a file, expanding imports relative to it.
    pub fn load_path(path: &Path, gate: &CapabilityGate) -> Result<ProgramDef> {
        let mut loader = Loader {
            def: ProgramDef::default(),
            gate,
            visited: HashSet::new(),
            loading: Vec::new(),
        };
        loader.load_file(path)?;
        Ok(loader.def)
    }

    /// Load a program from an in-memory source. Imports resolve relative to
    /// the I/O root.
    pub fn load_str(source: &str, gate: &CapabilityGate) -> Result<ProgramDef> {
        let mut loader = Loader {
            def: ProgramDef::default(),
            gate,
            visited: HashSet::new(),
            loading: Vec::new(),
        };
        let base = gate.config().io_root.clone();
        loader.load_lines(source, &base)?;
        Ok(loader.def)
    }

    /// Check the cross-reference invariants: every `in`/`out`/`@llm.schema`
    /// names a registered type, every op step names a registered op and
    /// binds no reserved name, and every flow edge names registered
    /// functions.
    pub fn validate(&self, registry: &OpRegistry) -> Result<()> {
        for (id, decl) in &self.fns {
            for type_ref in [&decl.input, &decl.output] {
                if let Some(type_ref) = type_ref {
                    if !self.types.contains(type_ref) {
                        return Err(AlpError::unresolved(format!(
                            "fn '{id}' references unknown type '{type_ref}'"
                        ))
                        .at(Location::node(id.clone())));
                    }
                }
            }
            for (index, step) in decl.ops.iter().enumerate() {
                if !registry.contains(&step.name) {
                    return Err(AlpError::unresolved(format!("unknown op '{}'", step.name))
                        .at(Location::op(id.clone(), index)));
                }
                if let Some(name) = &step.assign {
                    if RESERVED_NAMES.contains(&name.as_str()) {
                        return Err(AlpError::syntax(format!(
                            "op binding may not shadow reserved name '{name}'"
                        ))
                        .at(Location::op(id.clone(), index)));
                    }
                }
            }
            if let Some(llm) = &decl.llm {
                if !self.types.contains(&llm.schema) {
                    return Err(AlpError::unresolved(format!(
                        "fn '{id}' llm schema references unknown type '{}'",
                        llm.schema
                    ))
                    .at(Location::node(id.clone())));
                }
            }
        }
        for edge in &self.flow {
            if !self.fns.contains_key(&edge.source) {
                return Err(AlpError::unresolved(format!(
                    "flow edge references unknown fn '{}'",
                    edge.source
                )));
            }
            if let Some(dest) = &edge.dest {
                if !self.fns.contains_key(dest) {
                    return Err(AlpError::unresolved(format!(
                        "flow edge references unknown fn '{dest}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The flow to traverse: the declared edges, or, when none were
    /// declared, a single terminal edge for the first function (by id)
    /// that takes no input. A program with neither is not runnable.
    pub fn effective_flow(&self) -> Result<Vec<FlowEdge>> {
        if !self.flow.is_empty() {
            return Ok(self.flow.clone());
        }
        self.fns
            .iter()
            .find(|(_, decl)| decl.input.is_none())
            .map(|(id, _)| {
                vec![FlowEdge {
                    source: id.clone(),
                    dest: None,
                    when: None,
                }]
            })
            .ok_or_else(|| AlpError::syntax("no runnable nodes: no flow and no input-free fn"))
    }
}

struct Loader<'a> {
    def: ProgramDef,
    gate: &'a CapabilityGate,
    /// Canonical paths already fully loaded (import dedup).
    visited: HashSet<PathBuf>,
    /// Canonical paths currently mid-load (cycle detection).
    loading: Vec<PathBuf>,
}

impl Loader<'_> {
    fn load_file(&mut self, path: &Path) -> Result<()> {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        if self.visited.contains(&canonical) {
            return Ok(());
        }
        if self.loading.contains(&canonical) {
            return Err(AlpError::syntax(format!(
                "import cycle through '{}'",
                canonical.display()
            )));
        }
        self.loading.push(canonical.clone());

        let source = std::fs::read_to_string(path)
            .map_err(|e| AlpError::io(format!("cannot read '{}': {e}", path.display())))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let outcome = self.load_lines(&source, &base);

        self.loading.pop();
        self.visited.insert(canonical);
        outcome
    }

    fn load_lines(&mut self, source: &str, base: &Path) -> Result<()> {
        for (index, raw_line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
                AlpError::syntax(format!("invalid JSON: {e}")).at(Location::line(line_no))
            })?;
            let node = parse_node(value, line_no)?;
            self.register(node, base, line_no)?;
        }
        Ok(())
    }

    fn register(&mut self, node: Node, base: &Path, line_no: usize) -> Result<()> {
        match node {
            Node::Shape(shape) => self
                .def
                .types
                .register_shape(&shape)
                .map_err(|e| e.at(Location::line(line_no))),
            Node::Def(def) => self
                .def
                .types
                .register_def(&def)
                .map_err(|e| e.at(Location::line(line_no))),
            Node::Tool(tool) => match self.def.tools.get(&tool.id) {
                Some(existing) if *existing == tool => Ok(()),
                Some(_) => Err(AlpError::duplicate(format!(
                    "tool '{}' already registered with a different body",
                    tool.id
                ))
                .at(Location::line(line_no))),
                None => {
                    self.def.tools.insert(tool.id.clone(), tool);
                    Ok(())
                }
            },
            Node::Fn(decl) => match self.def.fns.get(&decl.id) {
                Some(existing) if *existing == decl => Ok(()),
                Some(_) => Err(AlpError::duplicate(format!(
                    "fn '{}' already registered with a different body",
                    decl.id
                ))
                .at(Location::line(line_no))),
                None => {
                    self.def.fns.insert(decl.id.clone(), decl);
                    Ok(())
                }
            },
            Node::Flow(flow) => {
                self.def.flow.extend(flow.edges);
                Ok(())
            }
            Node::Import(import) => {
                let target = base.join(&import.path);
                // Imports stay inside the I/O root.
                let resolved = self
                    .gate
                    .resolve_read(&target.to_string_lossy())
                    .map_err(|e| e.at(Location::line(line_no)))?;
                self.load_file(&resolved)
            }
        }
    }
}
