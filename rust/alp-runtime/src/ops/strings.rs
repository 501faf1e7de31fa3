//! String operations: concatenation, splitting, regex, formatting, case
//! conversion, slicing, reversible encodings, and hashing.

use super::{arg, text_arg, Args, OpContext, OpRegistry};
use alp_core::value::to_display_string;
use alp_core::{AlpError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::Md5;
use regex::Regex;
use serde_json::{json, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

fn op_concat(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    if let Some(Value::Array(items)) = arg(args, "items") {
        let joined: String = items.iter().map(|v| to_display_string(v)).collect();
        return Ok(Value::String(joined));
    }
    let a = text_arg(args, "a").unwrap_or_default();
    let b = text_arg(args, "b").unwrap_or_default();
    Ok(Value::String(format!("{a}{b}")))
}

fn op_join(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let items = match arg(args, "items") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    let sep = text_arg(args, "sep").unwrap_or_default();
    let joined = items
        .iter()
        .map(|v| to_display_string(v))
        .collect::<Vec<_>>()
        .join(&sep);
    Ok(Value::String(joined))
}

fn op_split(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let sep = text_arg(args, "sep").unwrap_or_else(|| ",".to_string());
    let parts: Vec<Value> = text
        .split(sep.as_str())
        .map(|s| Value::String(s.to_string()))
        .collect();
    Ok(Value::Array(parts))
}

fn op_replace(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let find = text_arg(args, "find").unwrap_or_default();
    let replacement = text_arg(args, "replace").unwrap_or_default();
    let limit = arg(args, "count").and_then(Value::as_i64).unwrap_or(-1);

    if find.is_empty() {
        return Ok(json!({"result": text, "count": 0}));
    }
    let occurrences = text.matches(find.as_str()).count();
    let (result, replaced) = if limit < 0 {
        (text.replace(find.as_str(), &replacement), occurrences)
    } else {
        let n = (limit as usize).min(occurrences);
        (text.replacen(find.as_str(), &replacement, n), n)
    };
    Ok(json!({"result": result, "count": replaced}))
}

/// Compile a pattern with the optional `i`/`m`/`s` flag letters.
fn compile_regex(pattern: &str, flags: &str) -> Result<Regex> {
    let mut inline = String::new();
    for flag in ["i", "m", "s"] {
        if flags.contains(flag) {
            inline.push_str(flag);
        }
    }
    let full = if inline.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{inline}){pattern}")
    };
    Regex::new(&full).map_err(|e| AlpError::op(format!("invalid regex pattern: {e}")))
}

fn op_regex_match(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let pattern = text_arg(args, "pattern").unwrap_or_default();
    let flags = text_arg(args, "flags").unwrap_or_default();
    let re = compile_regex(&pattern, &flags)?;

    match re.captures(&text) {
        Some(caps) => {
            let whole = caps.get(0).expect("group 0 always present");
            let groups: Vec<Value> = (1..caps.len())
                .map(|i| match caps.get(i) {
                    Some(m) => Value::String(m.as_str().to_string()),
                    None => Value::Null,
                })
                .collect();
            Ok(json!({
                "matched": true,
                "text": whole.as_str(),
                "groups": groups,
                "start": whole.start(),
                "end": whole.end(),
            }))
        }
        None => Ok(json!({"matched": false, "text": null, "groups": []})),
    }
}

fn op_regex_replace(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let pattern = text_arg(args, "pattern").unwrap_or_default();
    let replacement = text_arg(args, "replacement").unwrap_or_default();
    let flags = text_arg(args, "flags").unwrap_or_default();
    let limit = arg(args, "count").and_then(Value::as_u64).unwrap_or(0) as usize;
    let re = compile_regex(&pattern, &flags)?;

    // Accept backslash group references (\1) alongside regex-crate syntax.
    let replacement = translate_backrefs(&replacement);
    let matches = re.find_iter(&text).count();
    let applied = if limit == 0 { matches } else { limit.min(matches) };
    let result = re.replacen(&text, limit, replacement.as_str()).into_owned();
    Ok(json!({"result": result, "count": applied}))
}

fn translate_backrefs(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(d) = chars.peek().copied().filter(|d| d.is_ascii_digit()) {
                chars.next();
                out.push_str(&format!("${{{d}}}"));
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn op_format(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let template = text_arg(args, "template").unwrap_or_default();
    let values = match arg(args, "values") {
        Some(Value::Object(m)) => m.clone(),
        _ => Default::default(),
    };
    let safe = arg(args, "safe").and_then(Value::as_bool).unwrap_or(true);

    let placeholder = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern");
    let mut missing = None;
    let result = placeholder.replace_all(&template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match values.get(key) {
            Some(value) => to_display_string(value),
            None => {
                if missing.is_none() {
                    missing = Some(key.to_string());
                }
                caps[0].to_string()
            }
        }
    });
    if let (false, Some(key)) = (safe, missing) {
        return Err(AlpError::op(format!("format: missing value for '{{{key}}}'")));
    }
    Ok(json!({"result": result}))
}

fn op_trim(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let mode = text_arg(args, "mode").unwrap_or_else(|| "both".to_string());
    let chars = text_arg(args, "chars");

    let matcher = |c: char| match &chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let result = match mode.as_str() {
        "left" => text.trim_start_matches(matcher).to_string(),
        "right" => text.trim_end_matches(matcher).to_string(),
        _ => text
            .trim_start_matches(matcher)
            .trim_end_matches(matcher)
            .to_string(),
    };
    Ok(json!({"result": result}))
}

fn op_case(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let mode = text_arg(args, "mode").unwrap_or_else(|| "lower".to_string());

    let result = match mode.as_str() {
        "upper" => text.to_uppercase(),
        "lower" => text.to_lowercase(),
        "title" => title_case(&text),
        "capitalize" => {
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        }
        "snake" => snake_case(&text),
        "camel" => camel_case(&text),
        _ => text,
    };
    Ok(json!({"result": result}))
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn snake_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    for (i, c) in text.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push('_');
        }
        if c.is_whitespace() || c == '-' {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

fn camel_case(text: &str) -> String {
    let words: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .collect();
    let mut out = String::with_capacity(text.len());
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            out.push_str(&word.to_lowercase());
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(&chars.as_str().to_lowercase());
            }
        }
    }
    out
}

/// Python-style slice index: negatives count from the end, out-of-range
/// clamps.
fn slice_index(index: i64, len: usize) -> usize {
    if index < 0 {
        (len as i64 + index).max(0) as usize
    } else {
        (index as usize).min(len)
    }
}

fn op_substring(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let chars: Vec<char> = text.chars().collect();
    let start = arg(args, "start").and_then(Value::as_i64).unwrap_or(0);
    let end = arg(args, "end").and_then(Value::as_i64);
    let length = arg(args, "length").and_then(Value::as_i64);

    let start_idx = slice_index(start, chars.len());
    let end_idx = match (end, length) {
        (Some(end), _) => slice_index(end, chars.len()),
        (None, Some(length)) => slice_index(start.saturating_add(length), chars.len()),
        (None, None) => chars.len(),
    };
    let result: String = if end_idx > start_idx {
        chars[start_idx..end_idx].iter().collect()
    } else {
        String::new()
    };
    Ok(json!({"result": result}))
}

fn op_encode_decode(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let operation = text_arg(args, "operation").unwrap_or_else(|| "encode".to_string());
    let format = text_arg(args, "format").unwrap_or_else(|| "base64".to_string());
    let encode = operation != "decode";

    let result = match format.as_str() {
        "base64" => {
            if encode {
                BASE64.encode(text.as_bytes())
            } else {
                let bytes = BASE64
                    .decode(text.as_bytes())
                    .map_err(|e| AlpError::op(format!("base64 decode failed: {e}")))?;
                String::from_utf8(bytes)
                    .map_err(|e| AlpError::op(format!("base64 payload is not UTF-8: {e}")))?
            }
        }
        "url" => {
            if encode {
                urlencoding::encode(&text).into_owned()
            } else {
                urlencoding::decode(&text)
                    .map_err(|e| AlpError::op(format!("url decode failed: {e}")))?
                    .into_owned()
            }
        }
        "hex" => {
            if encode {
                hex::encode(text.as_bytes())
            } else {
                let bytes = hex::decode(text.as_bytes())
                    .map_err(|e| AlpError::op(format!("hex decode failed: {e}")))?;
                String::from_utf8(bytes)
                    .map_err(|e| AlpError::op(format!("hex payload is not UTF-8: {e}")))?
            }
        }
        "html" => {
            if encode {
                html_escape(&text)
            } else {
                html_unescape(&text)
            }
        }
        other => return Err(AlpError::op(format!("unknown encoding format '{other}'"))),
    };
    Ok(json!({"result": result}))
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

fn html_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn op_hash(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let text = text_arg(args, "text").unwrap_or_default();
    let algorithm = text_arg(args, "algorithm").unwrap_or_else(|| "sha256".to_string());
    let digest = match algorithm.as_str() {
        "md5" => hex::encode(Md5::digest(text.as_bytes())),
        "sha1" => hex::encode(Sha1::digest(text.as_bytes())),
        "sha256" => hex::encode(Sha256::digest(text.as_bytes())),
        "sha512" => hex::encode(Sha512::digest(text.as_bytes())),
        other => return Err(AlpError::op(format!("unknown hash algorithm '{other}'"))),
    };
    Ok(json!({"hash": digest, "algorithm": algorithm}))
}

fn op_filter_nonempty_strings(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let items = super::required_list(args, "filter_nonempty_strings", "items")?;
    let kept: Vec<Value> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => {
                Some(Value::String(s.trim().to_string()))
            }
            _ => None,
        })
        .collect();
    Ok(Value::Array(kept))
}

fn op_coalesce_str(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let candidates: Vec<Value> = match arg(args, "items") {
        Some(Value::Array(items)) => items.clone(),
        _ => ["a", "b", "c", "d"]
            .iter()
            .filter_map(|k| args.get(*k).cloned())
            .collect(),
    };
    for candidate in &candidates {
        if let Value::String(s) = candidate {
            if !s.trim().is_empty() {
                return Ok(candidate.clone());
            }
        }
    }
    Ok(Value::String(String::new()))
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("concat", op_concat);
    registry.register("join", op_join);
    registry.register("split", op_split);
    registry.register("replace", op_replace);
    registry.register("regex_match", op_regex_match);
    registry.register("regex_replace", op_regex_replace);
    registry.register("format", op_format);
    registry.register("trim", op_trim);
    registry.register("case", op_case);
    registry.register("substring", op_substring);
    registry.register("encode_decode", op_encode_decode);
    registry.register("hash", op_hash);
    registry.register("filter_nonempty_strings", op_filter_nonempty_strings);
    registry.register("coalesce_str", op_coalesce_str);
}

#[cfg(test)]
mod tests {
    use super::super::testing::invoke;
    use alp_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn concat_pairs_and_items() {
        assert_eq!(
            invoke("concat", json!({"a": "foo", "b": "bar"})).unwrap(),
            json!("foobar")
        );
        assert_eq!(
            invoke("concat", json!({"items": ["a", 1, "b"]})).unwrap(),
            json!("a1b")
        );
        assert_eq!(invoke("concat", json!({})).unwrap(), json!(""));
    }

    #[test]
    fn join_and_split() {
        assert_eq!(
            invoke("join", json!({"items": ["a", "b"], "sep": "-"})).unwrap(),
            json!("a-b")
        );
        assert_eq!(
            invoke("split", json!({"text": "a,b,c"})).unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            invoke("split", json!({"text": "a b", "sep": " "})).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn replace_counts() {
        let out = invoke(
            "replace",
            json!({"text": "aaa", "find": "a", "replace": "b"}),
        )
        .unwrap();
        assert_eq!(out, json!({"result": "bbb", "count": 3}));

        let limited = invoke(
            "replace",
            json!({"text": "aaa", "find": "a", "replace": "b", "count": 2}),
        )
        .unwrap();
        assert_eq!(limited, json!({"result": "bba", "count": 2}));
    }

    #[test]
    fn regex_match_with_groups_and_flags() {
        let out = invoke(
            "regex_match",
            json!({"text": "Item 42 ready", "pattern": r"item (\d+)", "flags": "i"}),
        )
        .unwrap();
        assert_eq!(out["matched"], json!(true));
        assert_eq!(out["text"], json!("Item 42"));
        assert_eq!(out["groups"], json!(["42"]));
        assert_eq!(out["start"], json!(0));

        let miss = invoke(
            "regex_match",
            json!({"text": "abc", "pattern": r"\d+"}),
        )
        .unwrap();
        assert_eq!(miss["matched"], json!(false));
    }

    #[test]
    fn invalid_regex_is_op_error() {
        assert_eq!(
            invoke("regex_match", json!({"text": "x", "pattern": "("}))
                .unwrap_err()
                .kind(),
            ErrorKind::Op
        );
    }

    #[test]
    fn regex_replace_with_backrefs() {
        let out = invoke(
            "regex_replace",
            json!({"text": "a1 b2", "pattern": r"([a-z])(\d)", "replacement": r"\2\1"}),
        )
        .unwrap();
        assert_eq!(out, json!({"result": "1a 2b", "count": 2}));

        let limited = invoke(
            "regex_replace",
            json!({"text": "xxx", "pattern": "x", "replacement": "y", "count": 1}),
        )
        .unwrap();
        assert_eq!(limited, json!({"result": "yxx", "count": 1}));
    }

    #[test]
    fn format_fills_placeholders() {
        let out = invoke(
            "format",
            json!({"template": "{greet}, {name}!", "values": {"greet": "hi", "name": "ada"}}),
        )
        .unwrap();
        assert_eq!(out, json!({"result": "hi, ada!"}));

        // safe mode keeps unknown placeholders
        let safe = invoke(
            "format",
            json!({"template": "{missing}", "values": {}}),
        )
        .unwrap();
        assert_eq!(safe, json!({"result": "{missing}"}));

        let strict = invoke(
            "format",
            json!({"template": "{missing}", "values": {}, "safe": false}),
        );
        assert_eq!(strict.unwrap_err().kind(), ErrorKind::Op);
    }

    #[test]
    fn trim_modes() {
        assert_eq!(
            invoke("trim", json!({"text": "  x  "})).unwrap(),
            json!({"result": "x"})
        );
        assert_eq!(
            invoke("trim", json!({"text": "  x  ", "mode": "left"})).unwrap(),
            json!({"result": "x  "})
        );
        assert_eq!(
            invoke("trim", json!({"text": "--x--", "chars": "-"})).unwrap(),
            json!({"result": "x"})
        );
    }

    #[test]
    fn case_modes() {
        let check = |mode: &str, text: &str, expected: &str| {
            let out = invoke("case", json!({"text": text, "mode": mode})).unwrap();
            assert_eq!(out["result"], json!(expected), "mode {mode}");
        };
        check("upper", "ab", "AB");
        check("lower", "AB", "ab");
        check("title", "hello world", "Hello World");
        check("capitalize", "hello World", "Hello world");
        check("snake", "HelloWorld foo-bar", "hello_world_foo_bar");
        check("camel", "hello_world foo", "helloWorldFoo");
    }

    #[test]
    fn substring_python_slicing() {
        assert_eq!(
            invoke("substring", json!({"text": "hello", "start": 1, "end": 3})).unwrap(),
            json!({"result": "el"})
        );
        assert_eq!(
            invoke("substring", json!({"text": "hello", "start": -3})).unwrap(),
            json!({"result": "llo"})
        );
        assert_eq!(
            invoke("substring", json!({"text": "hello", "start": 1, "length": 2})).unwrap(),
            json!({"result": "el"})
        );
        assert_eq!(
            invoke("substring", json!({"text": "hello", "start": 9})).unwrap(),
            json!({"result": ""})
        );
    }

    #[test]
    fn encode_decode_round_trips() {
        for format in ["base64", "url", "hex", "html"] {
            let encoded = invoke(
                "encode_decode",
                json!({"text": "hi there & <you>", "operation": "encode", "format": format}),
            )
            .unwrap();
            let decoded = invoke(
                "encode_decode",
                json!({"text": encoded["result"], "operation": "decode", "format": format}),
            )
            .unwrap();
            assert_eq!(decoded["result"], json!("hi there & <you>"), "format {format}");
        }
    }

    #[test]
    fn encode_base64_known_vector() {
        let out = invoke(
            "encode_decode",
            json!({"text": "hello", "operation": "encode", "format": "base64"}),
        )
        .unwrap();
        assert_eq!(out["result"], json!("aGVsbG8="));
    }

    #[test]
    fn bad_decode_is_op_error() {
        assert_eq!(
            invoke(
                "encode_decode",
                json!({"text": "!!!", "operation": "decode", "format": "hex"})
            )
            .unwrap_err()
            .kind(),
            ErrorKind::Op
        );
    }

    #[test]
    fn hash_canonical_vectors() {
        let check = |algo: &str, expected: &str| {
            let out = invoke("hash", json!({"text": "abc", "algorithm": algo})).unwrap();
            assert_eq!(out["hash"], json!(expected), "algorithm {algo}");
            assert_eq!(out["algorithm"], json!(algo));
        };
        check("md5", "900150983cd24fb0d6963f7d28e17f72");
        check("sha1", "a9993e364706816aba3e25717850c26c9cd0d89d");
        check(
            "sha256",
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        );
        check(
            "sha512",
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f",
        );
    }

    #[test]
    fn unknown_hash_algorithm() {
        assert_eq!(
            invoke("hash", json!({"text": "x", "algorithm": "crc32"}))
                .unwrap_err()
                .kind(),
            ErrorKind::Op
        );
    }

    #[test]
    fn filter_nonempty_strings_trims() {
        let out = invoke(
            "filter_nonempty_strings",
            json!({"items": [" a ", "", 3, null, "b"]}),
        )
        .unwrap();
        assert_eq!(out, json!(["a", "b"]));
    }

    #[test]
    fn coalesce_str_picks_first_non_blank() {
        assert_eq!(
            invoke("coalesce_str", json!({"a": "", "b": "  ", "c": "x"})).unwrap(),
            json!("x")
        );
        assert_eq!(
            invoke("coalesce_str", json!({"items": ["", "y"]})).unwrap(),
            json!("y")
        );
        assert_eq!(invoke("coalesce_str", json!({})).unwrap(), json!(""));
    }
}
