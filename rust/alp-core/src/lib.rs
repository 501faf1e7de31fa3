//! ALP Core
//!
//! Data model shared by the loader, runtime, and VM: the JSON value helpers,
//! the error model, the stable token vocabulary, typed program nodes, and
//! condition evaluation.

pub mod condition;
pub mod error;
pub mod node;
pub mod value;
pub mod vocab;

pub use error::{AlpError, ErrorKind, Location, Result};
pub use node::{
    DefNode, FlowEdge, FlowNode, FnDecl, ImportNode, LlmSpec, Node, OpStep, RetryPolicy,
    ShapeNode, ToolDecl, ToolImpl,
};
