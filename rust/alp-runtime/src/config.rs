//! Runtime configuration.
//!
//! [`RuntimeConfig`] materializes the process-wide option set once at
//! startup; it is immutable afterwards and shared by reference. Embedders
//! construct it with the builder-style `with_*` methods; the CLI reads the
//! `ALP_*` environment variables via [`RuntimeConfig::from_env`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable process-wide configuration consumed by the capability gate and
/// the sandboxed operations.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Filesystem root for all path-based operations.
    pub io_root: PathBuf,
    /// Gate for write/delete/mkdir operations.
    pub io_allow_write: bool,
    /// Hosts permitted for `http` and HTTP tools. Empty denies all.
    pub http_allowlist: Vec<String>,
    /// Reject loopback/private destinations even when allowlisted.
    pub http_block_local: bool,
    /// Timeout applied to HTTP and LLM requests.
    pub http_timeout: Duration,
    /// Gate for `read_stdin`.
    pub stdin_allow: bool,
    /// Byte cap on stdin reads.
    pub stdin_max_bytes: usize,
    /// Permitted command heads for command tools. Empty denies all.
    pub tool_allow_commands: Vec<String>,
    /// Permitted modules for python tools. Empty denies all.
    pub tool_python_modules: Vec<String>,
    /// LLM provider: `mock`, `openai`, or `anthropic`.
    pub model_provider: String,
    /// Model override; each provider has its own default.
    pub model_name: Option<String>,
    /// Emit per-step environment snapshots on stderr.
    pub explain: bool,
    /// Maximum flow traversal depth.
    pub flow_depth_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            io_root: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            io_allow_write: false,
            http_allowlist: Vec::new(),
            http_block_local: true,
            http_timeout: Duration::from_secs(30),
            stdin_allow: false,
            stdin_max_bytes: 1_000_000,
            tool_allow_commands: Vec::new(),
            tool_python_modules: Vec::new(),
            model_provider: "mock".to_string(),
            model_name: None,
            explain: false,
            flow_depth_limit: 1024,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl RuntimeConfig {
    /// Build a configuration from the `ALP_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = RuntimeConfig::default();
        if let Ok(root) = env::var("ALP_IO_ROOT") {
            if !root.trim().is_empty() {
                config.io_root = PathBuf::from(root);
            }
        }
        if let Some(flag) = env_flag("ALP_IO_ALLOW_WRITE") {
            config.io_allow_write = flag;
        }
        config.http_allowlist = env_list("ALP_HTTP_ALLOWLIST");
        if let Ok(v) = env::var("ALP_HTTP_BLOCK_LOCAL") {
            config.http_block_local = v.trim() != "0";
        }
        if let Some(secs) = env::var("ALP_HTTP_TIMEOUT")
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
        {
            config.http_timeout = Duration::from_secs_f64(secs.max(0.0));
        }
        if let Some(flag) = env_flag("ALP_STDIN_ALLOW") {
            config.stdin_allow = flag;
        }
        if let Some(max) = env::var("ALP_STDIN_MAX_BYTES")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            config.stdin_max_bytes = max;
        }
        config.tool_allow_commands = env_list("ALP_TOOL_COMMANDS");
        config.tool_python_modules = env_list("ALP_TOOL_PYTHON_MODULES");
        if let Ok(provider) = env::var("ALP_MODEL_PROVIDER") {
            if !provider.trim().is_empty() {
                config.model_provider = provider.trim().to_lowercase();
            }
        }
        config.model_name = env::var("ALP_MODEL_NAME").ok().filter(|v| !v.is_empty());
        if let Some(flag) = env_flag("ALP_EXPLAIN") {
            config.explain = flag;
        }
        config
    }

    // -- builder-style setters ----------------------------------------------

    pub fn with_io_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.io_root = root.into();
        self
    }

    pub fn with_write_allowed(mut self, allow: bool) -> Self {
        self.io_allow_write = allow;
        self
    }

    pub fn with_http_allowlist<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.http_allowlist = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_http_block_local(mut self, block: bool) -> Self {
        self.http_block_local = block;
        self
    }

    pub fn with_http_timeout_secs(mut self, secs: u64) -> Self {
        self.http_timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_stdin_allowed(mut self, allow: bool) -> Self {
        self.stdin_allow = allow;
        self
    }

    pub fn with_tool_commands<I, S>(mut self, heads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_allow_commands = heads.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_python_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_python_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.model_provider = provider.into();
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_flow_depth_limit(mut self, limit: usize) -> Self {
        self.flow_depth_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_closed() {
        let config = RuntimeConfig::default();
        assert!(!config.io_allow_write);
        assert!(config.http_allowlist.is_empty());
        assert!(config.http_block_local);
        assert!(!config.stdin_allow);
        assert_eq!(config.model_provider, "mock");
        assert_eq!(config.flow_depth_limit, 1024);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builder_chains() {
        let config = RuntimeConfig::default()
            .with_io_root("/tmp")
            .with_write_allowed(true)
            .with_http_allowlist(["api.example.com"])
            .with_provider("openai")
            .with_flow_depth_limit(8);
        assert_eq!(config.io_root, PathBuf::from("/tmp"));
        assert!(config.io_allow_write);
        assert_eq!(config.http_allowlist, vec!["api.example.com"]);
        assert_eq!(config.model_provider, "openai");
        assert_eq!(config.flow_depth_limit, 8);
    }
}
