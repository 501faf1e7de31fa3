//! ALP VM
//!
//! Loads an ALP program (newline-delimited JSON), validates it against the
//! registries, and runs it: function bodies through the operation registry,
//! the flow graph depth-first with conditional edges.

pub mod exec;
pub mod flow;
pub mod loader;

pub use exec::Executor;
pub use flow::{RunOutcome, Scheduler};
pub use loader::ProgramDef;

use alp_core::Result;
use alp_runtime::cancel::CancelToken;
use alp_runtime::gate::CapabilityGate;
use alp_runtime::ops::OpRegistry;
use alp_runtime::RuntimeConfig;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// A loaded, validated program bound to a configuration, ready to run.
#[derive(Debug)]
pub struct Program {
    def: ProgramDef,
    registry: OpRegistry,
    config: Arc<RuntimeConfig>,
    cancel: CancelToken,
}

impl Program {
    /// Load from a file, expand imports, and validate all references.
    pub fn load(path: &Path, config: RuntimeConfig) -> Result<Program> {
        let config = Arc::new(config);
        let gate = CapabilityGate::new(config.clone());
        let def = ProgramDef::load_path(path, &gate)?;
        Self::finish(def, config)
    }

    /// Load from an in-memory source.
    pub fn load_str(source: &str, config: RuntimeConfig) -> Result<Program> {
        let config = Arc::new(config);
        let gate = CapabilityGate::new(config.clone());
        let def = ProgramDef::load_str(source, &gate)?;
        Self::finish(def, config)
    }

    fn finish(def: ProgramDef, config: Arc<RuntimeConfig>) -> Result<Program> {
        let registry = OpRegistry::builtin();
        def.validate(&registry)?;
        Ok(Program {
            def,
            registry,
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Token the embedder can use to cancel a run in progress from another
    /// thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The loaded definition (types, fns, tools, flow).
    pub fn def(&self) -> &ProgramDef {
        &self.def
    }

    /// Run the program's flow with an optional initial inbound value.
    pub fn run(&self, initial: Option<&Value>) -> Result<RunOutcome> {
        let executor = Executor::new(
            &self.def,
            &self.registry,
            self.config.clone(),
            self.cancel.clone(),
        );
        let edges = self.def.effective_flow()?;
        Scheduler::new(&executor, edges).run(initial)
    }

    /// Invoke a single function by id, outside the flow graph.
    pub fn run_fn(&self, fn_id: &str, inbound: Option<&Value>) -> Result<Value> {
        let executor = Executor::new(
            &self.def,
            &self.registry,
            self.config.clone(),
            self.cancel.clone(),
        );
        let decl = self
            .def
            .fns
            .get(fn_id)
            .ok_or_else(|| alp_core::AlpError::unresolved(format!("unknown fn '{fn_id}'")))?;
        executor.exec_fn(decl, inbound).map(|(value, _)| value)
    }
}
