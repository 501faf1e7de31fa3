//! ALP Runtime
//!
//! Type registry and validator, per-invocation environments with
//! `$`-reference resolution, the capability gate, the operation registry
//! with the full standard library, and the LLM adapter.

pub mod cancel;
pub mod config;
pub mod env;
pub mod gate;
pub mod llm;
pub mod ops;
pub mod types;

pub use cancel::CancelToken;
pub use config::RuntimeConfig;
pub use env::Environment;
pub use gate::CapabilityGate;
pub use ops::{Args, OpContext, OpHandler, OpRegistry, VmHooks};
pub use types::{TypeExpr, TypeRegistry};
