//! Error model shared by every layer of the VM.
//!
//! Every fallible operation returns an [`AlpError`] carrying a discriminated
//! [`ErrorKind`], a human-readable message, the source location where known
//! (node id, op index, source line), and an optional cause chain.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Discriminated error kinds surfaced by the VM.
///
/// The serialized names (`ErrSyntax`, `ErrHTTP`, …) are stable: they appear
/// in retry policies (`@retry.on`) and in embedder-facing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed node, expression, or program source.
    Syntax,
    /// Validation failure against a shape or typedef.
    Type,
    /// Missing variable, id, or operation name.
    Unresolved,
    /// Conflicting registration of an already-known id.
    Duplicate,
    /// Arithmetic domain error (e.g. division by zero).
    Math,
    /// Operation-internal failure.
    Op,
    /// Denied by the capability gate.
    Capability,
    /// Filesystem failure.
    Io,
    /// HTTP transport failure.
    Http,
    /// External tool failure.
    Tool,
    /// LLM adapter failure.
    Llm,
    /// A blocking operation exceeded its deadline.
    Timeout,
    /// Cancelled by the embedder.
    Cancelled,
    /// Flow traversal exceeded the depth limit.
    FlowDepth,
    /// A retry policy exhausted its attempts.
    RetryExhausted,
}

impl ErrorKind {
    /// Stable textual name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "ErrSyntax",
            ErrorKind::Type => "ErrType",
            ErrorKind::Unresolved => "ErrUnresolved",
            ErrorKind::Duplicate => "ErrDuplicate",
            ErrorKind::Math => "ErrMath",
            ErrorKind::Op => "ErrOp",
            ErrorKind::Capability => "ErrCapability",
            ErrorKind::Io => "ErrIO",
            ErrorKind::Http => "ErrHTTP",
            ErrorKind::Tool => "ErrTool",
            ErrorKind::Llm => "ErrLLM",
            ErrorKind::Timeout => "ErrTimeout",
            ErrorKind::Cancelled => "ErrCancelled",
            ErrorKind::FlowDepth => "ErrFlowDepth",
            ErrorKind::RetryExhausted => "ErrRetryExhausted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    /// Parse a kind from its stable name, case-insensitively and with or
    /// without the `Err` prefix (`"ErrHTTP"`, `"errhttp"`, `"http"`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let bare = lower.strip_prefix("err").unwrap_or(&lower);
        let kind = match bare {
            "syntax" => ErrorKind::Syntax,
            "type" => ErrorKind::Type,
            "unresolved" => ErrorKind::Unresolved,
            "duplicate" => ErrorKind::Duplicate,
            "math" => ErrorKind::Math,
            "op" => ErrorKind::Op,
            "capability" => ErrorKind::Capability,
            "io" => ErrorKind::Io,
            "http" => ErrorKind::Http,
            "tool" => ErrorKind::Tool,
            "llm" => ErrorKind::Llm,
            "timeout" => ErrorKind::Timeout,
            "cancelled" => ErrorKind::Cancelled,
            "flowdepth" => ErrorKind::FlowDepth,
            "retryexhausted" => ErrorKind::RetryExhausted,
            _ => return Err(format!("unknown error kind: {s}")),
        };
        Ok(kind)
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Source location attached to an error where known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Node id (`@fn`/`@shape`/… identifier).
    pub node: Option<String>,
    /// Zero-based index of the op step inside a function body.
    pub op_index: Option<usize>,
    /// One-based source line in the program file.
    pub line: Option<usize>,
}

impl Location {
    /// Location naming only a node.
    pub fn node(id: impl Into<String>) -> Self {
        Location {
            node: Some(id.into()),
            ..Location::default()
        }
    }

    /// Location naming a node and an op index.
    pub fn op(id: impl Into<String>, index: usize) -> Self {
        Location {
            node: Some(id.into()),
            op_index: Some(index),
            line: None,
        }
    }

    /// Location naming only a source line.
    pub fn line(line: usize) -> Self {
        Location {
            line: Some(line),
            ..Location::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.node.is_none() && self.op_index.is_none() && self.line.is_none()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(node) = &self.node {
            parts.push(format!("node '{node}'"));
        }
        if let Some(idx) = self.op_index {
            parts.push(format!("op {idx}"));
        }
        if let Some(line) = self.line {
            parts.push(format!("line {line}"));
        }
        f.write_str(&parts.join(", "))
    }
}

// ---------------------------------------------------------------------------
// AlpError
// ---------------------------------------------------------------------------

/// Error value propagated through the VM.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}{}", display_location(.location))]
pub struct AlpError {
    kind: ErrorKind,
    message: String,
    location: Location,
    #[source]
    cause: Option<Box<AlpError>>,
}

fn display_location(location: &Location) -> String {
    if location.is_empty() {
        String::new()
    } else {
        format!(" (at {location})")
    }
}

impl AlpError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        AlpError {
            kind,
            message: message.into(),
            location: Location::default(),
            cause: None,
        }
    }

    /// Attach a source location. Fields already set on the error win, so a
    /// deeper frame's node/op survives an outer frame's annotation.
    pub fn at(mut self, location: Location) -> Self {
        if self.location.node.is_none() {
            self.location.node = location.node;
        }
        if self.location.op_index.is_none() {
            self.location.op_index = location.op_index;
        }
        if self.location.line.is_none() {
            self.location.line = location.line;
        }
        self
    }

    /// Attach a cause.
    pub fn caused_by(mut self, cause: AlpError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The source location, if any part of it is known.
    pub fn location(&self) -> Option<&Location> {
        if self.location.is_empty() {
            None
        } else {
            Some(&self.location)
        }
    }

    /// The attached cause, if any.
    pub fn cause(&self) -> Option<&AlpError> {
        self.cause.as_deref()
    }

    // -- constructors for the common kinds ---------------------------------

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn type_err(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn unresolved(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unresolved, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub fn math(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Math, message)
    }

    pub fn op(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Op, message)
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capability, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http, message)
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tool, message)
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Llm, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, AlpError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ErrorKind::Http.name(), "ErrHTTP");
        assert_eq!(ErrorKind::Io.name(), "ErrIO");
        assert_eq!(ErrorKind::RetryExhausted.name(), "ErrRetryExhausted");
    }

    #[test]
    fn kind_parses_with_and_without_prefix() {
        assert_eq!("ErrHTTP".parse::<ErrorKind>().unwrap(), ErrorKind::Http);
        assert_eq!("http".parse::<ErrorKind>().unwrap(), ErrorKind::Http);
        assert_eq!("errtype".parse::<ErrorKind>().unwrap(), ErrorKind::Type);
        assert!("bogus".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn display_includes_location() {
        let err = AlpError::math("division by zero").at(Location::op("f", 2));
        assert_eq!(
            err.to_string(),
            "ErrMath: division by zero (at node 'f', op 2)"
        );
    }

    #[test]
    fn deeper_location_wins() {
        let err = AlpError::op("boom")
            .at(Location::op("inner", 1))
            .at(Location::node("outer"));
        let loc = err.location().unwrap();
        assert_eq!(loc.node.as_deref(), Some("inner"));
        assert_eq!(loc.op_index, Some(1));
    }

    #[test]
    fn cause_chain_is_reachable() {
        let cause = AlpError::http("status 500");
        let err = AlpError::new(ErrorKind::RetryExhausted, "3 attempts failed").caused_by(cause);
        assert_eq!(err.cause().unwrap().kind(), ErrorKind::Http);
        assert!(std::error::Error::source(&err).is_some());
    }
}
