//! Capability gate — the single authority for privileged operations.
//!
//! Every sandboxed op (file I/O, HTTP, tools, stdin) consults the gate
//! before touching the outside world and surfaces `ErrCapability` on
//! denial, keeping policy failures distinguishable from transport failures
//! (`ErrIO`/`ErrHTTP`/`ErrTool`).
//!
//! Decisions are pure: path checks are lexical (no filesystem access) and
//! host checks parse the URL without DNS resolution or sockets.

use crate::config::RuntimeConfig;
use alp_core::{AlpError, Result};
use reqwest::Url;
use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Yes/no authority over privileged actions, derived from an immutable
/// [`RuntimeConfig`]. Cheap to clone and safe to share across invocations.
#[derive(Debug, Clone)]
pub struct CapabilityGate {
    config: Arc<RuntimeConfig>,
}

impl CapabilityGate {
    /// Build a gate over the given configuration.
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        CapabilityGate { config }
    }

    /// The configuration this gate enforces.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // -- filesystem ---------------------------------------------------------

    /// Resolve a program-supplied path for reading. The result is the
    /// canonical absolute path, guaranteed to lie under the I/O root.
    pub fn resolve_read(&self, path: &str) -> Result<PathBuf> {
        self.resolve_under_root(path)
    }

    /// Resolve a program-supplied path for writing. Requires the write flag
    /// in addition to the root constraint.
    pub fn resolve_write(&self, path: &str) -> Result<PathBuf> {
        if !self.config.io_allow_write {
            return Err(AlpError::capability(
                "write operations disabled (io_allow_write is off)",
            ));
        }
        self.resolve_under_root(path)
    }

    fn resolve_under_root(&self, path: &str) -> Result<PathBuf> {
        let root = normalize(&absolute(&self.config.io_root));
        let candidate = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            root.join(path)
        };
        let resolved = normalize(&candidate);
        if resolved == root || resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(AlpError::capability(format!(
                "path '{path}' escapes the I/O root"
            )))
        }
    }

    // -- HTTP ---------------------------------------------------------------

    /// Check a URL against the host allow-list and the local-address policy.
    /// Returns the parsed URL so callers never re-parse after the check.
    pub fn check_http(&self, url: &str) -> Result<Url> {
        let parsed = Url::parse(url)
            .map_err(|e| AlpError::capability(format!("invalid URL '{url}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AlpError::capability(format!("URL '{url}' has no host")))?
            .to_lowercase();

        if self.config.http_block_local && is_local_host(&host) {
            return Err(AlpError::capability(format!(
                "host '{host}' is a local/private address"
            )));
        }
        if !self
            .config
            .http_allowlist
            .iter()
            .any(|allowed| allowed.to_lowercase() == host)
        {
            return Err(AlpError::capability(format!(
                "host '{host}' is not on the HTTP allow-list"
            )));
        }
        Ok(parsed)
    }

    // -- tools --------------------------------------------------------------

    /// Check the head (first token) of a command line against the command
    /// allow-list.
    pub fn check_tool_command(&self, command: &str) -> Result<()> {
        let head = command.split_whitespace().next().unwrap_or("");
        if head.is_empty() {
            return Err(AlpError::capability("empty tool command"));
        }
        if self.config.tool_allow_commands.iter().any(|c| c == head) {
            Ok(())
        } else {
            Err(AlpError::capability(format!(
                "command '{head}' is not on the tool allow-list"
            )))
        }
    }

    /// Check a python module against the module allow-list.
    pub fn check_tool_python(&self, module: &str) -> Result<()> {
        if self.config.tool_python_modules.iter().any(|m| m == module) {
            Ok(())
        } else {
            Err(AlpError::capability(format!(
                "python module '{module}' is not on the tool allow-list"
            )))
        }
    }

    // -- stdin --------------------------------------------------------------

    /// Check that stdin reads are enabled; returns the byte cap.
    pub fn check_stdin(&self) -> Result<usize> {
        if self.config.stdin_allow {
            Ok(self.config.stdin_max_bytes)
        } else {
            Err(AlpError::capability(
                "stdin reads disabled (stdin_allow is off)",
            ))
        }
    }
}

/// Make a path absolute against the current directory without touching the
/// filesystem.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    }
}

/// Lexically normalize a path: drop `.` segments and resolve `..` against
/// the components seen so far. `..` at the root stays at the root, so the
/// containment check still catches escapes.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Loopback, private, and link-local destinations. Hostnames other than
/// `localhost` are not resolved; the policy is purely syntactic.
fn is_local_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    match host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => {
            let segments = v6.segments();
            v6.is_loopback()
                || (segments[0] & 0xfe00) == 0xfc00 // unique local fc00::/7
                || (segments[0] & 0xffc0) == 0xfe80 // link local fe80::/10
        }
        Err(_) => false,
    }
}
