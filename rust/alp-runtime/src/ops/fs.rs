//! Filesystem operations, all routed through the capability gate.
//!
//! Read-class ops require only the I/O-root constraint; write-class ops
//! (`write_file`, `mkdir`, `delete_file`) additionally require the write
//! flag. Gate denials are `ErrCapability`; underlying filesystem failures
//! are `ErrIO`.

use super::{arg, required_str, text_arg, Args, OpContext, OpRegistry};
use alp_core::{AlpError, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

fn io_err(context: &str, err: std::io::Error) -> AlpError {
    AlpError::io(format!("{context}: {err}"))
}

fn op_read_file(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let path = required_str(args, "read_file", "path")?;
    let resolved = ctx.gate.resolve_read(&path)?;
    let text = fs::read_to_string(&resolved)
        .map_err(|e| io_err(&format!("read_file '{path}'"), e))?;
    Ok(json!({"text": text}))
}

fn op_write_file(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let path = required_str(args, "write_file", "path")?;
    let text = text_arg(args, "text").unwrap_or_default();
    let append = arg(args, "append").and_then(Value::as_bool).unwrap_or(false);
    let resolved = ctx.gate.resolve_write(&path)?;

    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(&format!("write_file '{path}'"), e))?;
    }
    if append {
        use std::io::Write as _;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&resolved)
            .map_err(|e| io_err(&format!("write_file '{path}'"), e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| io_err(&format!("write_file '{path}'"), e))?;
    } else {
        fs::write(&resolved, text.as_bytes())
            .map_err(|e| io_err(&format!("write_file '{path}'"), e))?;
    }
    Ok(json!({"ok": true}))
}

/// Minimal name pattern: `*` matches everything, `*.ext` matches by suffix,
/// anything else matches exactly.
fn name_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        true
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else {
        name == pattern
    }
}

fn op_list_files(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let path = text_arg(args, "path").unwrap_or_else(|| ".".to_string());
    let pattern = text_arg(args, "pattern").unwrap_or_else(|| "*".to_string());
    let type_filter = text_arg(args, "type").unwrap_or_else(|| "all".to_string());
    let resolved = ctx.gate.resolve_read(&path)?;

    let entries = fs::read_dir(&resolved).map_err(|e| io_err(&format!("list_files '{path}'"), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&format!("list_files '{path}'"), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name_matches(&pattern, &name) {
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|e| io_err(&format!("list_files '{path}'"), e))?;
        let keep = match type_filter.as_str() {
            "file" => file_type.is_file(),
            "dir" => file_type.is_dir(),
            _ => true,
        };
        if keep {
            files.push(Value::String(name));
        }
    }
    files.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    let count = files.len();
    Ok(json!({"files": files, "count": count}))
}

fn op_file_exists(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let path = required_str(args, "file_exists", "path")?;
    let resolved = ctx.gate.resolve_read(&path)?;
    match fs::metadata(&resolved) {
        Ok(meta) => {
            let kind = if meta.is_file() {
                "file"
            } else if meta.is_dir() {
                "dir"
            } else {
                "other"
            };
            Ok(json!({"exists": true, "type": kind, "path": path}))
        }
        Err(_) => Ok(json!({"exists": false, "path": path})),
    }
}

fn op_mkdir(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let path = required_str(args, "mkdir", "path")?;
    let parents = arg(args, "parents").and_then(Value::as_bool).unwrap_or(true);
    let resolved = ctx.gate.resolve_write(&path)?;

    if resolved.exists() {
        return Ok(json!({"created": false, "path": path, "existed": true}));
    }
    let result = if parents {
        fs::create_dir_all(&resolved)
    } else {
        fs::create_dir(&resolved)
    };
    result.map_err(|e| io_err(&format!("mkdir '{path}'"), e))?;
    Ok(json!({"created": true, "path": path}))
}

fn op_delete_file(args: &Args, ctx: &OpContext<'_>) -> Result<Value> {
    let path = required_str(args, "delete_file", "path")?;
    let recursive = arg(args, "recursive").and_then(Value::as_bool).unwrap_or(false);
    let resolved = ctx.gate.resolve_write(&path)?;

    let meta = match fs::metadata(&resolved) {
        Ok(meta) => meta,
        Err(_) => return Ok(json!({"deleted": false, "path": path, "error": "Path does not exist"})),
    };
    let result = if meta.is_dir() {
        if recursive {
            fs::remove_dir_all(&resolved)
        } else {
            fs::remove_dir(&resolved)
        }
    } else {
        fs::remove_file(&resolved)
    };
    result.map_err(|e| io_err(&format!("delete_file '{path}'"), e))?;
    Ok(json!({"deleted": true, "path": path}))
}

fn op_path_join(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let parts = match arg(args, "parts") {
        Some(Value::Array(parts)) => parts.clone(),
        _ => Vec::new(),
    };
    let mut joined = std::path::PathBuf::new();
    for part in &parts {
        joined.push(alp_core::value::to_display_string(part));
    }
    Ok(json!({"path": joined.to_string_lossy()}))
}

fn op_path_split(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let path = text_arg(args, "path").unwrap_or_default();
    let as_path = Path::new(&path);
    let dir = as_path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = as_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (name, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (base.clone(), String::new()),
    };
    let parts: Vec<Value> = if path.is_empty() {
        Vec::new()
    } else {
        path.split(std::path::MAIN_SEPARATOR)
            .map(|s| Value::String(s.to_string()))
            .collect()
    };
    Ok(json!({"dir": dir, "base": base, "name": name, "ext": ext, "parts": parts}))
}

fn op_path_basename(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let path = required_str(args, "path_basename", "path")?;
    let base = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Value::String(base))
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("read_file", op_read_file);
    registry.register("write_file", op_write_file);
    registry.register("list_files", op_list_files);
    registry.register("file_exists", op_file_exists);
    registry.register("mkdir", op_mkdir);
    registry.register("delete_file", op_delete_file);
    registry.register("path_join", op_path_join);
    registry.register("path_split", op_path_split);
    registry.register("path_basename", op_path_basename);
}

#[cfg(test)]
mod tests {
    use super::super::testing::{invoke_with, NoHooks};
    use crate::config::RuntimeConfig;
    use alp_core::ErrorKind;
    use serde_json::json;

    fn sandbox() -> (tempfile::TempDir, RuntimeConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::default()
            .with_io_root(dir.path())
            .with_write_allowed(true);
        (dir, config)
    }

    #[test]
    fn write_then_read_round_trip() {
        let (_dir, config) = sandbox();
        let written = invoke_with(
            "write_file",
            json!({"path": "notes/a.txt", "text": "hello"}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(written, json!({"ok": true}));

        let read = invoke_with(
            "read_file",
            json!({"path": "notes/a.txt"}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(read, json!({"text": "hello"}));
    }

    #[test]
    fn append_mode_appends() {
        let (_dir, config) = sandbox();
        for _ in 0..2 {
            invoke_with(
                "write_file",
                json!({"path": "log.txt", "text": "x", "append": true}),
                &config,
                &NoHooks,
            )
            .unwrap();
        }
        let read = invoke_with("read_file", json!({"path": "log.txt"}), &config, &NoHooks).unwrap();
        assert_eq!(read["text"], json!("xx"));
    }

    #[test]
    fn write_denied_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::default().with_io_root(dir.path());
        let err = invoke_with(
            "write_file",
            json!({"path": "a.txt", "text": "x"}),
            &config,
            &NoHooks,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn escaping_root_is_capability_error() {
        let (_dir, config) = sandbox();
        let err = invoke_with(
            "read_file",
            json!({"path": "../outside.txt"}),
            &config,
            &NoHooks,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn missing_file_is_io_error() {
        let (_dir, config) = sandbox();
        let err = invoke_with(
            "read_file",
            json!({"path": "nope.txt"}),
            &config,
            &NoHooks,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn list_files_with_pattern_and_type() {
        let (_dir, config) = sandbox();
        for name in ["a.txt", "b.txt", "c.log"] {
            invoke_with(
                "write_file",
                json!({"path": name, "text": ""}),
                &config,
                &NoHooks,
            )
            .unwrap();
        }
        invoke_with("mkdir", json!({"path": "sub"}), &config, &NoHooks).unwrap();

        let txt = invoke_with(
            "list_files",
            json!({"path": ".", "pattern": "*.txt"}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(txt["files"], json!(["a.txt", "b.txt"]));
        assert_eq!(txt["count"], json!(2));

        let dirs = invoke_with(
            "list_files",
            json!({"path": ".", "type": "dir"}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(dirs["files"], json!(["sub"]));
    }

    #[test]
    fn file_exists_reports_kind() {
        let (_dir, config) = sandbox();
        invoke_with(
            "write_file",
            json!({"path": "x.txt", "text": ""}),
            &config,
            &NoHooks,
        )
        .unwrap();
        let hit = invoke_with("file_exists", json!({"path": "x.txt"}), &config, &NoHooks).unwrap();
        assert_eq!(hit["exists"], json!(true));
        assert_eq!(hit["type"], json!("file"));

        let miss =
            invoke_with("file_exists", json!({"path": "y.txt"}), &config, &NoHooks).unwrap();
        assert_eq!(miss["exists"], json!(false));
    }

    #[test]
    fn mkdir_and_delete() {
        let (_dir, config) = sandbox();
        let made = invoke_with("mkdir", json!({"path": "a/b"}), &config, &NoHooks).unwrap();
        assert_eq!(made["created"], json!(true));

        let again = invoke_with("mkdir", json!({"path": "a/b"}), &config, &NoHooks).unwrap();
        assert_eq!(again["created"], json!(false));
        assert_eq!(again["existed"], json!(true));

        let gone = invoke_with(
            "delete_file",
            json!({"path": "a", "recursive": true}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(gone["deleted"], json!(true));

        let missing = invoke_with(
            "delete_file",
            json!({"path": "a"}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(missing["deleted"], json!(false));
    }

    #[test]
    fn path_helpers() {
        let (_dir, config) = sandbox();
        let joined = invoke_with(
            "path_join",
            json!({"parts": ["a", "b", "c.txt"]}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(joined["path"], json!("a/b/c.txt"));

        let split = invoke_with(
            "path_split",
            json!({"path": "a/b/c.txt"}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(split["dir"], json!("a/b"));
        assert_eq!(split["base"], json!("c.txt"));
        assert_eq!(split["name"], json!("c"));
        assert_eq!(split["ext"], json!(".txt"));

        let base = invoke_with(
            "path_basename",
            json!({"path": "a/b/c.txt"}),
            &config,
            &NoHooks,
        )
        .unwrap();
        assert_eq!(base, json!("c.txt"));
    }
}
